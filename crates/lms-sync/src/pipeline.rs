//! Stage sequencing with explicit preconditions
//!
//! The stages of one pull form a small dependency graph: sections and
//! enrollments are fetched per staged course, and normalization writes in
//! foreign-key order. Rather than relying on call-order convention, each
//! stage declares its prerequisites and [`Pipeline::run_stage`] refuses to
//! start a stage whose prerequisites have not completed in this run.
//!
//! When resuming a pull whose ingestion ran in an earlier invocation, the
//! caller marks the ingest stages satisfied via
//! [`Pipeline::assume_completed`].

use std::collections::HashSet;

use tracing::{error, info};

use lms_common::types::{ExclusionSet, Pull};
use lms_common::{Result, SyncError};

use crate::api::ApiClient;
use crate::ingest::Ingestor;
use crate::normalize::Normalizer;
use crate::store::SyncStore;

/// One step of the synchronization pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    IngestCourses,
    IngestSections,
    IngestEnrollments,
    NormalizeCourses,
    NormalizeSections,
    NormalizeEnrollments,
}

/// Every stage, in execution order
pub const ALL_STAGES: &[Stage] = &[
    Stage::IngestCourses,
    Stage::IngestSections,
    Stage::IngestEnrollments,
    Stage::NormalizeCourses,
    Stage::NormalizeSections,
    Stage::NormalizeEnrollments,
];

/// The ingestion half of the pipeline, in execution order
pub const INGEST_STAGES: &[Stage] = &[
    Stage::IngestCourses,
    Stage::IngestSections,
    Stage::IngestEnrollments,
];

/// The normalization half of the pipeline, in execution order
pub const NORMALIZE_STAGES: &[Stage] = &[
    Stage::NormalizeCourses,
    Stage::NormalizeSections,
    Stage::NormalizeEnrollments,
];

impl Stage {
    /// Stages that must have completed before this one starts
    pub fn prerequisites(self) -> &'static [Stage] {
        match self {
            Stage::IngestCourses => &[],
            Stage::IngestSections => &[Stage::IngestCourses],
            Stage::IngestEnrollments => &[Stage::IngestCourses],
            Stage::NormalizeCourses => &[Stage::IngestCourses],
            Stage::NormalizeSections => &[Stage::IngestSections, Stage::NormalizeCourses],
            Stage::NormalizeEnrollments => &[Stage::IngestEnrollments, Stage::NormalizeCourses],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::IngestCourses => "ingest-courses",
            Stage::IngestSections => "ingest-sections",
            Stage::IngestEnrollments => "ingest-enrollments",
            Stage::NormalizeCourses => "normalize-courses",
            Stage::NormalizeSections => "normalize-sections",
            Stage::NormalizeEnrollments => "normalize-enrollments",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-stage summary for operator reporting
#[derive(Debug, Clone, Copy)]
pub struct StageReport {
    pub stage: Stage,
    /// Records staged or imported
    pub processed: usize,
    /// Records skipped
    pub skipped: usize,
}

/// Runs pipeline stages against one pull
pub struct Pipeline<'a, S: SyncStore> {
    ingestor: Ingestor<'a, S>,
    normalizer: Normalizer<'a, S>,
    completed: HashSet<Stage>,
}

impl<'a, S: SyncStore> Pipeline<'a, S> {
    pub fn new(
        client: &'a ApiClient,
        store: &'a S,
        exclusions: &'a ExclusionSet,
        dry_run: bool,
    ) -> Self {
        Self {
            ingestor: Ingestor::new(client, store, exclusions),
            normalizer: Normalizer::new(store, exclusions, dry_run),
            completed: HashSet::new(),
        }
    }

    /// Mark a stage as already satisfied, e.g. when resuming a pull whose
    /// ingestion ran in an earlier invocation
    pub fn assume_completed(&mut self, stage: Stage) {
        self.completed.insert(stage);
    }

    /// Run the given stages in order, stopping at the first fatal error.
    /// Work committed by earlier stages remains; re-running is safe.
    pub async fn run(&mut self, pull: &Pull, stages: &[Stage]) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(stages.len());
        for &stage in stages {
            reports.push(self.run_stage(pull, stage).await?);
        }
        Ok(reports)
    }

    /// Run a single stage after checking its prerequisites
    pub async fn run_stage(&mut self, pull: &Pull, stage: Stage) -> Result<StageReport> {
        for &prerequisite in stage.prerequisites() {
            if !self.completed.contains(&prerequisite) {
                return Err(SyncError::StageOrder {
                    stage: stage.to_string(),
                    missing: prerequisite.to_string(),
                });
            }
        }

        info!(pull_id = pull.id, %stage, "running stage");

        let result = match stage {
            Stage::IngestCourses => self
                .ingestor
                .ingest_courses(pull)
                .await
                .map(|o| (o.staged, o.skipped)),
            Stage::IngestSections => self
                .ingestor
                .ingest_sections(pull)
                .await
                .map(|o| (o.staged, o.skipped)),
            Stage::IngestEnrollments => self
                .ingestor
                .ingest_enrollments(pull)
                .await
                .map(|o| (o.staged, o.skipped)),
            Stage::NormalizeCourses => self
                .normalizer
                .normalize_courses(pull)
                .await
                .map(|o| (o.imported, o.skipped)),
            Stage::NormalizeSections => self
                .normalizer
                .normalize_sections(pull)
                .await
                .map(|o| (o.imported, o.skipped)),
            Stage::NormalizeEnrollments => self
                .normalizer
                .normalize_users_and_enrollments(pull)
                .await
                .map(|o| (o.imported, o.skipped)),
        };

        let (processed, skipped) = result.map_err(|e| {
            error!(pull_id = pull.id, %stage, error = %e, "stage failed");
            e
        })?;

        self.completed.insert(stage);
        info!(pull_id = pull.id, %stage, processed, skipped, "stage complete");

        Ok(StageReport {
            stage,
            processed,
            skipped,
        })
    }
}
