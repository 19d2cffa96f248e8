//! LMS Sync Library
//!
//! Batch synchronization of course, section, user, and enrollment data from
//! a learning-management REST API into a relational store.
//!
//! The pipeline has two halves, both scoped to one [`Pull`]
//! (a batch marker):
//!
//! 1. **Ingestion** walks the API and stages every response object verbatim,
//!    keyed by (external id, pull, entity kind) so re-runs are no-ops.
//! 2. **Normalization** reads the staged JSON back, maps it through typed
//!    wire records, and upserts canonical rows in foreign-key order:
//!    courses, then sections, then users and enrollments.
//!
//! # Example
//!
//! ```no_run
//! use lms_sync::api::ApiClient;
//! use lms_sync::config::Config;
//! use lms_sync::pipeline::{Pipeline, ALL_STAGES};
//! use lms_sync::store::{MemoryStore, SyncStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let client = ApiClient::new(&config.api)?;
//!     let store = MemoryStore::new();
//!     let pull = store.create_pull().await?;
//!
//!     let mut pipeline = Pipeline::new(&client, &store, &config.exclusions, false);
//!     pipeline.run(&pull, ALL_STAGES).await?;
//!     Ok(())
//! }
//! ```
//!
//! [`Pull`]: lms_common::types::Pull

pub mod api;
pub mod config;
pub mod ingest;
pub mod normalize;
pub mod pipeline;
pub mod store;
