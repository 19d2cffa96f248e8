//! In-memory storage binding
//!
//! Mirrors the constraint behavior of the PostgreSQL schema: the staged
//! triple and the enrollment (user, course, type) triple raise conflicts,
//! canonical upserts are last-write-wins by id. Used by the test suite and
//! for verifying pipelines without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use lms_common::types::{Course, CourseSection, EntityKind, Enrollment, Pull, StagedRecord, User};
use lms_common::{Result, SyncError};

use crate::store::SyncStore;

#[derive(Default)]
struct Inner {
    next_pull_id: i64,
    pulls: BTreeMap<i64, Pull>,
    staged: BTreeMap<(i64, i64, EntityKind), StagedRecord>,
    courses: BTreeMap<i64, Course>,
    sections: BTreeMap<i64, CourseSection>,
    users: BTreeMap<i64, User>,
    enrollments: BTreeMap<i64, Enrollment>,
}

/// In-memory [`SyncStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of canonical course rows
    pub fn course_count(&self) -> usize {
        self.lock().courses.len()
    }

    /// Number of canonical section rows
    pub fn section_count(&self) -> usize {
        self.lock().sections.len()
    }

    /// Number of canonical user rows
    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    /// Number of canonical enrollment rows
    pub fn enrollment_count(&self) -> usize {
        self.lock().enrollments.len()
    }

    pub fn get_course(&self, id: i64) -> Option<Course> {
        self.lock().courses.get(&id).cloned()
    }

    pub fn get_section(&self, id: i64) -> Option<CourseSection> {
        self.lock().sections.get(&id).cloned()
    }

    pub fn get_user(&self, id: i64) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn get_enrollment(&self, id: i64) -> Option<Enrollment> {
        self.lock().enrollments.get(&id).cloned()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn create_pull(&self) -> Result<Pull> {
        let mut inner = self.lock();
        inner.next_pull_id += 1;
        let pull = Pull {
            id: inner.next_pull_id,
            ts: Utc::now(),
        };
        inner.pulls.insert(pull.id, pull);
        Ok(pull)
    }

    async fn get_pull(&self, id: i64) -> Result<Option<Pull>> {
        Ok(self.lock().pulls.get(&id).copied())
    }

    async fn insert_staged(&self, record: &StagedRecord) -> Result<()> {
        let mut inner = self.lock();
        let key = (record.external_id, record.pull_id, record.kind);
        if inner.staged.contains_key(&key) {
            return Err(SyncError::conflict(
                record.kind.as_str(),
                record.external_id,
            ));
        }
        inner.staged.insert(key, record.clone());
        Ok(())
    }

    async fn staged_for(&self, pull_id: i64, kind: EntityKind) -> Result<Vec<StagedRecord>> {
        Ok(self
            .lock()
            .staged
            .values()
            .filter(|r| r.pull_id == pull_id && r.kind == kind)
            .cloned()
            .collect())
    }

    async fn staged_count(&self, pull_id: i64, kind: EntityKind) -> Result<u64> {
        Ok(self
            .lock()
            .staged
            .values()
            .filter(|r| r.pull_id == pull_id && r.kind == kind)
            .count() as u64)
    }

    async fn upsert_course(&self, course: &Course) -> Result<()> {
        self.lock().courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn upsert_section(&self, section: &CourseSection) -> Result<()> {
        self.lock().sections.insert(section.id, section.clone());
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.lock().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        let mut inner = self.lock();
        let duplicate_triple = inner.enrollments.values().any(|e| {
            e.id != enrollment.id
                && e.user_id == enrollment.user_id
                && e.course_id == enrollment.course_id
                && e.enrollment_type == enrollment.enrollment_type
        });
        if duplicate_triple {
            return Err(SyncError::conflict("enrollment", enrollment.id));
        }
        inner.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(())
    }

    async fn course_exists(&self, id: i64) -> Result<bool> {
        Ok(self.lock().courses.contains_key(&id))
    }

    async fn section_exists(&self, id: i64) -> Result<bool> {
        Ok(self.lock().sections.contains_key(&id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn staged(external_id: i64, pull_id: i64, kind: EntityKind) -> StagedRecord {
        StagedRecord {
            external_id,
            pull_id,
            kind,
            payload: format!(r#"{{"id": {external_id}}}"#),
        }
    }

    #[tokio::test]
    async fn staged_triple_is_unique() {
        let store = MemoryStore::new();
        let pull = store.create_pull().await.unwrap();

        store
            .insert_staged(&staged(1, pull.id, EntityKind::Course))
            .await
            .unwrap();

        let err = store
            .insert_staged(&staged(1, pull.id, EntityKind::Course))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Same id under a different kind or pull is fine
        store
            .insert_staged(&staged(1, pull.id, EntityKind::Section))
            .await
            .unwrap();
        let other_pull = store.create_pull().await.unwrap();
        store
            .insert_staged(&staged(1, other_pull.id, EntityKind::Course))
            .await
            .unwrap();

        assert_eq!(
            store.staged_count(pull.id, EntityKind::Course).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn enrollment_triple_is_unique() {
        let store = MemoryStore::new();

        let mut enrollment = Enrollment {
            id: 1,
            user_id: 10,
            course_id: 20,
            course_section_id: None,
            enrollment_type: Some("StudentEnrollment".to_string()),
            role: None,
            role_id: None,
            enrollment_state: None,
            created_at: None,
            updated_at: None,
            last_activity_at: None,
            last_attended_at: None,
            total_activity_time: None,
        };
        store.upsert_enrollment(&enrollment).await.unwrap();

        // Re-upserting the same id is idempotent
        store.upsert_enrollment(&enrollment).await.unwrap();
        assert_eq!(store.enrollment_count(), 1);

        // A different id with the same (user, course, type) conflicts
        enrollment.id = 2;
        let err = store.upsert_enrollment(&enrollment).await.unwrap_err();
        assert!(err.is_conflict());

        // A different type on the same course is allowed
        enrollment.enrollment_type = Some("TaEnrollment".to_string());
        store.upsert_enrollment(&enrollment).await.unwrap();
        assert_eq!(store.enrollment_count(), 2);
    }

    #[tokio::test]
    async fn course_upsert_is_last_write_wins() {
        let store = MemoryStore::new();
        let mut course = Course {
            id: 500,
            name: Some("Intro".to_string()),
            account_id: None,
            uuid: None,
            course_code: None,
            enrollment_term_id: None,
            start_at: None,
            end_at: None,
            created_at: None,
            sis_course_id: None,
        };
        store.upsert_course(&course).await.unwrap();

        course.name = Some("Intro to Rust".to_string());
        store.upsert_course(&course).await.unwrap();

        assert_eq!(store.course_count(), 1);
        assert_eq!(
            store.get_course(500).unwrap().name.as_deref(),
            Some("Intro to Rust")
        );
    }
}
