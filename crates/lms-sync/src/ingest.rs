//! Raw ingestion stage
//!
//! Walks the API and persists every response object verbatim into staging,
//! keyed by (external id, pull, kind). A record already staged under the
//! same pull is skipped, never an error, so interrupted runs can resume.
//!
//! Sections and enrollments are fetched per staged course, so
//! [`Ingestor::ingest_courses`] must run first within a pull.

use serde_json::Value;
use tracing::{debug, info, warn};

use lms_common::types::{EntityKind, ExclusionSet, Pull, StagedRecord};
use lms_common::Result;

use crate::api::ApiClient;
use crate::store::SyncStore;

/// Counts reported by one ingestion operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Records newly written to staging
    pub staged: usize,
    /// Records skipped: already staged, excluded, or unkeyable
    pub skipped: usize,
}

impl std::ops::AddAssign for IngestOutcome {
    fn add_assign(&mut self, other: Self) {
        self.staged += other.staged;
        self.skipped += other.skipped;
    }
}

/// Stages raw API responses under a pull
pub struct Ingestor<'a, S: SyncStore> {
    client: &'a ApiClient,
    store: &'a S,
    exclusions: &'a ExclusionSet,
}

impl<'a, S: SyncStore> Ingestor<'a, S> {
    pub fn new(client: &'a ApiClient, store: &'a S, exclusions: &'a ExclusionSet) -> Self {
        Self {
            client,
            store,
            exclusions,
        }
    }

    /// Fetch all courses and stage each one
    pub async fn ingest_courses(&self, pull: &Pull) -> Result<IngestOutcome> {
        let courses = self.client.get_all_courses().await?;
        info!(pull_id = pull.id, count = courses.len(), "fetched courses");

        let outcome = self.stage_all(pull, EntityKind::Course, &courses).await?;
        info!(pull_id = pull.id, staged = outcome.staged, "staged courses");
        Ok(outcome)
    }

    /// Fetch and stage the sections of every staged course in this pull
    pub async fn ingest_sections(&self, pull: &Pull) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();
        for course in self.store.staged_for(pull.id, EntityKind::Course).await? {
            debug!(course_id = course.external_id, "fetching sections");
            let sections = self.client.get_course_sections(course.external_id).await?;
            outcome += self.stage_all(pull, EntityKind::Section, &sections).await?;
        }
        info!(pull_id = pull.id, staged = outcome.staged, "staged sections");
        Ok(outcome)
    }

    /// Fetch and stage the enrollments of every staged, non-excluded course
    /// in this pull
    pub async fn ingest_enrollments(&self, pull: &Pull) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();
        for course in self.store.staged_for(pull.id, EntityKind::Course).await? {
            if self.exclusions.contains(course.external_id) {
                info!(
                    course_id = course.external_id,
                    "excluded course, not fetching enrollments"
                );
                continue;
            }
            debug!(course_id = course.external_id, "fetching enrollments");
            let enrollments = self
                .client
                .get_course_enrollments(course.external_id)
                .await?;
            outcome += self
                .stage_all(pull, EntityKind::Enrollment, &enrollments)
                .await?;
        }
        info!(pull_id = pull.id, staged = outcome.staged, "staged enrollments");
        Ok(outcome)
    }

    /// Stage a batch of response objects under one kind.
    ///
    /// Conflicts (already staged in this pull) are skipped; objects without
    /// a numeric `id` cannot be keyed and are skipped with a warning; any
    /// other storage error aborts the stage.
    async fn stage_all(
        &self,
        pull: &Pull,
        kind: EntityKind,
        objects: &[Value],
    ) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();
        for object in objects {
            let Some(external_id) = object.get("id").and_then(Value::as_i64) else {
                warn!(%kind, "response object has no numeric id, skipping");
                outcome.skipped += 1;
                continue;
            };

            let record = StagedRecord {
                external_id,
                pull_id: pull.id,
                kind,
                payload: serde_json::to_string(object)?,
            };

            match self.store.insert_staged(&record).await {
                Ok(()) => outcome.staged += 1,
                Err(e) if e.is_conflict() => {
                    debug!(%kind, external_id, pull_id = pull.id, "already staged, skipping");
                    outcome.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}
