//! Normalization stage
//!
//! Reads staged JSON for a pull, maps it through the typed wire records, and
//! upserts canonical rows. Stages must run in foreign-key order: courses,
//! then sections, then users and enrollments.
//!
//! Referential policy (decided, see DESIGN.md): a section or enrollment
//! whose course was never normalized is rejected deterministically (logged
//! and skipped, never an orphan row); an enrollment whose section reference
//! does not resolve keeps the enrollment but clears the section reference.

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use lms_common::types::{Course, EntityKind, ExclusionSet, Pull, StagedRecord, User};
use lms_common::{Result, SyncError};

use crate::store::SyncStore;

/// Counts reported by one normalization operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOutcome {
    /// Canonical rows written (or, in dry-run, that would have been written)
    pub imported: usize,
    /// Records skipped: excluded, conflicting, unresolvable, or missing data
    pub skipped: usize,
}

/// Maps staged JSON into canonical rows
pub struct Normalizer<'a, S: SyncStore> {
    store: &'a S,
    exclusions: &'a ExclusionSet,
    /// Parse and map without issuing writes
    dry_run: bool,
}

impl<'a, S: SyncStore> Normalizer<'a, S> {
    pub fn new(store: &'a S, exclusions: &'a ExclusionSet, dry_run: bool) -> Self {
        Self {
            store,
            exclusions,
            dry_run,
        }
    }

    /// Normalize every staged course in the pull.
    ///
    /// Parse failures are fatal and name the offending record; exclusions
    /// and upsert conflicts are skipped.
    pub async fn normalize_courses(&self, pull: &Pull) -> Result<NormalizeOutcome> {
        let mut outcome = NormalizeOutcome::default();

        for staged in self.store.staged_for(pull.id, EntityKind::Course).await? {
            let raw: lms_common::types::RawCourse = parse_payload(&staged)?;

            if self.exclusions.contains(raw.id) {
                debug!(course_id = raw.id, "excluded course, skipping");
                outcome.skipped += 1;
                continue;
            }

            let course = Course::from(raw);
            if self.dry_run {
                debug!(course_id = course.id, "dry-run: would upsert course");
                outcome.imported += 1;
                continue;
            }

            match self.store.upsert_course(&course).await {
                Ok(()) => outcome.imported += 1,
                Err(e) if e.is_conflict() => {
                    warn!(course_id = course.id, "course conflict, skipping");
                    outcome.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }

        info!(
            pull_id = pull.id,
            imported = outcome.imported,
            skipped = outcome.skipped,
            "normalized courses"
        );
        Ok(outcome)
    }

    /// Normalize every staged section in the pull
    pub async fn normalize_sections(&self, pull: &Pull) -> Result<NormalizeOutcome> {
        let mut outcome = NormalizeOutcome::default();

        for staged in self.store.staged_for(pull.id, EntityKind::Section).await? {
            let raw: lms_common::types::RawSection = parse_payload(&staged)?;

            let Some(course_id) = raw.course_id else {
                warn!(section_id = raw.id, "section has no course id, skipping");
                outcome.skipped += 1;
                continue;
            };

            if self.exclusions.contains(course_id) {
                debug!(section_id = raw.id, course_id, "excluded course, skipping section");
                outcome.skipped += 1;
                continue;
            }

            if self.dry_run {
                debug!(section_id = raw.id, "dry-run: would upsert section");
                outcome.imported += 1;
                continue;
            }

            if !self.store.course_exists(course_id).await? {
                warn!(
                    section_id = raw.id,
                    course_id, "course not normalized, rejecting section"
                );
                outcome.skipped += 1;
                continue;
            }

            let section = raw.into_record(course_id);
            match self.store.upsert_section(&section).await {
                Ok(()) => outcome.imported += 1,
                Err(e) if e.is_conflict() => {
                    warn!(section_id = section.id, "section conflict, skipping");
                    outcome.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }

        info!(
            pull_id = pull.id,
            imported = outcome.imported,
            skipped = outcome.skipped,
            "normalized sections"
        );
        Ok(outcome)
    }

    /// Normalize every staged enrollment in the pull, upserting the nested
    /// user first so the enrollment's user reference resolves.
    ///
    /// Records whose course is excluded are skipped entirely. Records with
    /// no nested user object are logged and skipped; the batch continues.
    pub async fn normalize_users_and_enrollments(&self, pull: &Pull) -> Result<NormalizeOutcome> {
        let mut outcome = NormalizeOutcome::default();

        for staged in self
            .store
            .staged_for(pull.id, EntityKind::Enrollment)
            .await?
        {
            let mut raw: lms_common::types::RawEnrollment = parse_payload(&staged)?;

            let Some(course_id) = raw.course_id else {
                warn!(enrollment_id = raw.id, "enrollment has no course id, skipping");
                outcome.skipped += 1;
                continue;
            };

            if self.exclusions.contains(course_id) {
                debug!(
                    enrollment_id = raw.id,
                    course_id, "excluded course, skipping enrollment"
                );
                outcome.skipped += 1;
                continue;
            }

            let Some(raw_user) = raw.user.take() else {
                // Some API roles omit the nested user object
                let err = SyncError::MissingUser {
                    enrollment_id: raw.id,
                };
                warn!(error = %err, "skipping enrollment record");
                outcome.skipped += 1;
                continue;
            };

            let user = User::from(raw_user);
            let user_id = raw.user_id.unwrap_or(user.id);

            if self.dry_run {
                debug!(
                    enrollment_id = raw.id,
                    user_id, "dry-run: would upsert user and enrollment"
                );
                outcome.imported += 1;
                continue;
            }

            if !self.store.course_exists(course_id).await? {
                warn!(
                    enrollment_id = raw.id,
                    course_id, "course not normalized, rejecting enrollment"
                );
                outcome.skipped += 1;
                continue;
            }

            let section_id = match raw.course_section_id {
                Some(section_id) if !self.store.section_exists(section_id).await? => {
                    warn!(
                        enrollment_id = raw.id,
                        section_id, "section not normalized, clearing section reference"
                    );
                    None
                },
                other => other,
            };

            match self.store.upsert_user(&user).await {
                Ok(()) => {},
                Err(e) if e.is_conflict() => {
                    debug!(user_id = user.id, "user conflict, skipping user upsert");
                },
                Err(e) => return Err(e),
            }

            let enrollment = raw.into_record(user_id, course_id, section_id);
            match self.store.upsert_enrollment(&enrollment).await {
                Ok(()) => outcome.imported += 1,
                Err(e) if e.is_conflict() => {
                    warn!(enrollment_id = enrollment.id, "enrollment conflict, skipping");
                    outcome.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }

        info!(
            pull_id = pull.id,
            imported = outcome.imported,
            skipped = outcome.skipped,
            "normalized users and enrollments"
        );
        Ok(outcome)
    }
}

/// Parse a staged payload into a typed wire record. Failure names the
/// offending record and aborts the stage.
fn parse_payload<T: DeserializeOwned>(staged: &StagedRecord) -> Result<T> {
    serde_json::from_str(&staged.payload).map_err(|e| SyncError::Parse {
        entity: staged.kind.as_str(),
        id: staged.external_id,
        message: e.to_string(),
    })
}
