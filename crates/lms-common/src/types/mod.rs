//! Domain types for the synchronization pipeline
//!
//! Two families live here:
//!
//! - **Canonical records** ([`Course`], [`CourseSection`], [`User`],
//!   [`Enrollment`]) — the relational shape reporting runs against, keyed by
//!   the external id the source API assigns.
//! - **Raw wire records** ([`RawCourse`], [`RawSection`], [`RawEnrollment`],
//!   [`RawUser`]) — schema-validated intermediates deserialized from staged
//!   JSON. Every field except `id` is optional; a missing `id` is a parse
//!   failure, not a defaulting case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SyncError};

// ============================================================================
// Pull / Staging
// ============================================================================

/// One synchronization batch.
///
/// Created once per sync invocation and immutable thereafter. Staged records
/// reference it and cascade-delete with it; pulls themselves are never
/// deleted automatically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pull {
    pub id: i64,
    pub ts: DateTime<Utc>,
}

/// Kind of entity a staged record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Course,
    Section,
    Enrollment,
}

impl EntityKind {
    /// Storage encoding of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Course => "Course",
            EntityKind::Section => "CourseSection",
            EntityKind::Enrollment => "Enrollment",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Course" => Ok(EntityKind::Course),
            "CourseSection" => Ok(EntityKind::Section),
            "Enrollment" => Ok(EntityKind::Enrollment),
            other => Err(SyncError::config(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// A raw API response object persisted verbatim under a pull.
///
/// The triple (external_id, pull_id, kind) is unique in storage; re-staging
/// the same object within one pull surfaces as a conflict the caller skips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub external_id: i64,
    pub pull_id: i64,
    pub kind: EntityKind,
    /// Serialized JSON payload, exactly as the API returned it
    pub payload: String,
}

// ============================================================================
// Canonical records
// ============================================================================

/// A course, keyed by the external id from the source API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub name: Option<String>,
    pub account_id: Option<i64>,
    pub uuid: Option<String>,
    pub course_code: Option<String>,
    pub enrollment_term_id: Option<i64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub sis_course_id: Option<String>,
}

/// A section of a course. Courses merged into one class carry one section
/// per original course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSection {
    pub id: i64,
    pub course_id: i64,
    pub name: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub sis_course_id: Option<String>,
    pub sis_section_id: Option<String>,
}

/// A user: students, teachers, and observers alike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub sortable_name: Option<String>,
    pub short_name: Option<String>,
    pub sis_user_id: Option<String>,
    pub root_account: Option<String>,
    pub login_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Association of a user to a course, with the role they hold there.
///
/// (user_id, course_id, enrollment_type) is unique: a user cannot hold the
/// same enrollment type twice on one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub course_section_id: Option<i64>,
    pub enrollment_type: Option<String>,
    pub role: Option<String>,
    pub role_id: Option<i64>,
    pub enrollment_state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_attended_at: Option<DateTime<Utc>>,
    pub total_activity_time: Option<i64>,
}

// ============================================================================
// Raw wire records
// ============================================================================

/// Course object as the API returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RawCourse {
    pub id: i64,
    pub name: Option<String>,
    pub account_id: Option<i64>,
    pub uuid: Option<String>,
    pub course_code: Option<String>,
    pub enrollment_term_id: Option<i64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub sis_course_id: Option<String>,
}

impl From<RawCourse> for Course {
    fn from(raw: RawCourse) -> Self {
        Course {
            id: raw.id,
            name: raw.name,
            account_id: raw.account_id,
            uuid: raw.uuid,
            course_code: raw.course_code,
            enrollment_term_id: raw.enrollment_term_id,
            start_at: raw.start_at,
            end_at: raw.end_at,
            created_at: raw.created_at,
            sis_course_id: raw.sis_course_id,
        }
    }
}

/// Section object as the API returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RawSection {
    pub id: i64,
    pub course_id: Option<i64>,
    pub name: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub sis_course_id: Option<String>,
    pub sis_section_id: Option<String>,
}

impl RawSection {
    /// Build the canonical record once the owning course id has been
    /// resolved and checked against the exclusion set
    pub fn into_record(self, course_id: i64) -> CourseSection {
        CourseSection {
            id: self.id,
            course_id,
            name: self.name,
            start_at: self.start_at,
            end_at: self.end_at,
            created_at: self.created_at,
            sis_course_id: self.sis_course_id,
            sis_section_id: self.sis_section_id,
        }
    }
}

/// Nested user object inside an enrollment payload
#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: i64,
    pub name: Option<String>,
    pub sortable_name: Option<String>,
    pub short_name: Option<String>,
    pub sis_user_id: Option<String>,
    pub root_account: Option<String>,
    pub login_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        User {
            id: raw.id,
            name: raw.name,
            sortable_name: raw.sortable_name,
            short_name: raw.short_name,
            sis_user_id: raw.sis_user_id,
            root_account: raw.root_account,
            login_id: raw.login_id,
            created_at: raw.created_at,
        }
    }
}

/// Enrollment object as the API returns it.
///
/// The nested `user` object is optional because some API roles omit it;
/// normalization skips such records.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnrollment {
    pub id: i64,
    pub user_id: Option<i64>,
    pub course_id: Option<i64>,
    pub course_section_id: Option<i64>,
    #[serde(rename = "type")]
    pub enrollment_type: Option<String>,
    pub role: Option<String>,
    pub role_id: Option<i64>,
    pub enrollment_state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_attended_at: Option<DateTime<Utc>>,
    pub total_activity_time: Option<i64>,
    pub user: Option<RawUser>,
}

impl RawEnrollment {
    /// Build the canonical record once the user, course, and section
    /// references have been resolved
    pub fn into_record(
        self,
        user_id: i64,
        course_id: i64,
        course_section_id: Option<i64>,
    ) -> Enrollment {
        Enrollment {
            id: self.id,
            user_id,
            course_id,
            course_section_id,
            enrollment_type: self.enrollment_type,
            role: self.role,
            role_id: self.role_id,
            enrollment_state: self.enrollment_state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_activity_at: self.last_activity_at,
            last_attended_at: self.last_attended_at,
            total_activity_time: self.total_activity_time,
        }
    }
}

// ============================================================================
// Exclusion set
// ============================================================================

/// Immutable set of external course ids that are never imported.
///
/// Covers courses the operator cannot access, courses with pathological
/// enrollment list sizes, and courses that are organizationally irrelevant.
/// Loaded from configuration and injected into both ingestion and
/// normalization; membership is the only operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionSet(HashSet<i64>);

impl ExclusionSet {
    /// Build from an iterator of course ids
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Membership test
    pub fn contains(&self, course_id: i64) -> bool {
        self.0.contains(&course_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a comma-separated id list, as supplied via environment variable
    pub fn parse_list(s: &str) -> Result<Self> {
        let mut ids = HashSet::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let id = part.parse::<i64>().map_err(|_| {
                SyncError::config(format!("invalid excluded course id '{part}'"))
            })?;
            ids.insert(id);
        }
        Ok(Self(ids))
    }

    /// Parse file contents: one id per line, `#` starts a comment
    pub fn parse_lines(s: &str) -> Result<Self> {
        let mut ids = HashSet::new();
        for line in s.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let id = line.parse::<i64>().map_err(|_| {
                SyncError::config(format!("invalid excluded course id '{line}'"))
            })?;
            ids.insert(id);
        }
        Ok(Self(ids))
    }

    /// Union of two sets, used to merge env and file sources
    pub fn merge(mut self, other: ExclusionSet) -> Self {
        self.0.extend(other.0);
        self
    }
}
