//! Storage contract of the synchronization core
//!
//! The pipeline talks to storage through [`SyncStore`]. The trait captures
//! exactly what the stages need: conflict-distinguishing staged inserts,
//! keyed upserts for the canonical tables, and existence probes for
//! referential checks. [`PgStore`] is the production binding; [`MemoryStore`]
//! backs tests and offline verification.

use async_trait::async_trait;
use lms_common::types::{Course, CourseSection, EntityKind, Enrollment, Pull, StagedRecord, User};
use lms_common::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage operations required by ingestion and normalization
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Create a new pull with the current timestamp
    async fn create_pull(&self) -> Result<Pull>;

    /// Look up an existing pull
    async fn get_pull(&self, id: i64) -> Result<Option<Pull>>;

    /// Insert one staged record. A duplicate (external_id, pull, kind)
    /// triple surfaces as [`SyncError::Conflict`].
    ///
    /// [`SyncError::Conflict`]: lms_common::SyncError::Conflict
    async fn insert_staged(&self, record: &StagedRecord) -> Result<()>;

    /// All staged records of one kind within a pull, in staging order
    async fn staged_for(&self, pull_id: i64, kind: EntityKind) -> Result<Vec<StagedRecord>>;

    /// Number of staged records of one kind within a pull
    async fn staged_count(&self, pull_id: i64, kind: EntityKind) -> Result<u64>;

    /// Upsert a course keyed by external id (last write wins)
    async fn upsert_course(&self, course: &Course) -> Result<()>;

    /// Upsert a section keyed by external id
    async fn upsert_section(&self, section: &CourseSection) -> Result<()>;

    /// Upsert a user keyed by external id
    async fn upsert_user(&self, user: &User) -> Result<()>;

    /// Upsert an enrollment keyed by external id. A violation of the
    /// (user, course, type) uniqueness constraint surfaces as
    /// [`SyncError::Conflict`].
    ///
    /// [`SyncError::Conflict`]: lms_common::SyncError::Conflict
    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<()>;

    /// Whether a canonical course row exists
    async fn course_exists(&self, id: i64) -> Result<bool>;

    /// Whether a canonical section row exists
    async fn section_exists(&self, id: i64) -> Result<bool>;
}
