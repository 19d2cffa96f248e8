//! PostgreSQL storage binding (sqlx)
//!
//! Uniqueness and foreign-key constraints in the schema are the only
//! concurrency guard the design relies on; every write here is either an
//! insert whose unique-violation is mapped to [`SyncError::Conflict`] or an
//! `ON CONFLICT DO UPDATE` upsert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use lms_common::types::{Course, CourseSection, EntityKind, Enrollment, Pull, StagedRecord, User};
use lms_common::{Result, SyncError};

use crate::config::DatabaseConfig;
use crate::store::SyncStore;

/// Embedded migrations for the staging + canonical schema
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// PostgreSQL-backed [`SyncStore`]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the configured URL and pool size
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply pending schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| SyncError::config(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a unique violation to a conflict, anything else to a database error
fn conflict_or_db(e: sqlx::Error, entity: &'static str, id: i64) -> SyncError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return SyncError::conflict(entity, id);
        }
    }
    SyncError::Database(e)
}

#[async_trait]
impl SyncStore for PgStore {
    async fn create_pull(&self) -> Result<Pull> {
        let (id, ts) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO pulls DEFAULT VALUES RETURNING id, ts",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(Pull { id, ts })
    }

    async fn get_pull(&self, id: i64) -> Result<Option<Pull>> {
        let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "SELECT id, ts FROM pulls WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, ts)| Pull { id, ts }))
    }

    async fn insert_staged(&self, record: &StagedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staged_records (external_id, pull_id, kind, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.external_id)
        .bind(record.pull_id)
        .bind(record.kind.as_str())
        .bind(&record.payload)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, record.kind.as_str(), record.external_id))?;
        Ok(())
    }

    async fn staged_for(&self, pull_id: i64, kind: EntityKind) -> Result<Vec<StagedRecord>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String)>(
            r#"
            SELECT external_id, pull_id, kind, payload
            FROM staged_records
            WHERE pull_id = $1 AND kind = $2
            ORDER BY id
            "#,
        )
        .bind(pull_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (external_id, pull_id, kind, payload) in rows {
            records.push(StagedRecord {
                external_id,
                pull_id,
                kind: kind.parse()?,
                payload,
            });
        }
        Ok(records)
    }

    async fn staged_count(&self, pull_id: i64, kind: EntityKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM staged_records WHERE pull_id = $1 AND kind = $2",
        )
        .bind(pull_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn upsert_course(&self, course: &Course) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO courses
                (id, name, account_id, uuid, course_code, enrollment_term_id,
                 start_at, end_at, created_at, sis_course_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                account_id = EXCLUDED.account_id,
                uuid = EXCLUDED.uuid,
                course_code = EXCLUDED.course_code,
                enrollment_term_id = EXCLUDED.enrollment_term_id,
                start_at = EXCLUDED.start_at,
                end_at = EXCLUDED.end_at,
                created_at = EXCLUDED.created_at,
                sis_course_id = EXCLUDED.sis_course_id
            "#,
        )
        .bind(course.id)
        .bind(&course.name)
        .bind(course.account_id)
        .bind(&course.uuid)
        .bind(&course.course_code)
        .bind(course.enrollment_term_id)
        .bind(course.start_at)
        .bind(course.end_at)
        .bind(course.created_at)
        .bind(&course.sis_course_id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "course", course.id))?;
        Ok(())
    }

    async fn upsert_section(&self, section: &CourseSection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO course_sections
                (id, course_id, name, start_at, end_at, created_at,
                 sis_course_id, sis_section_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                course_id = EXCLUDED.course_id,
                name = EXCLUDED.name,
                start_at = EXCLUDED.start_at,
                end_at = EXCLUDED.end_at,
                created_at = EXCLUDED.created_at,
                sis_course_id = EXCLUDED.sis_course_id,
                sis_section_id = EXCLUDED.sis_section_id
            "#,
        )
        .bind(section.id)
        .bind(section.course_id)
        .bind(&section.name)
        .bind(section.start_at)
        .bind(section.end_at)
        .bind(section.created_at)
        .bind(&section.sis_course_id)
        .bind(&section.sis_section_id)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "section", section.id))?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, name, sortable_name, short_name, sis_user_id,
                 root_account, login_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                sortable_name = EXCLUDED.sortable_name,
                short_name = EXCLUDED.short_name,
                sis_user_id = EXCLUDED.sis_user_id,
                root_account = EXCLUDED.root_account,
                login_id = EXCLUDED.login_id,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.sortable_name)
        .bind(&user.short_name)
        .bind(&user.sis_user_id)
        .bind(&user.root_account)
        .bind(&user.login_id)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "user", user.id))?;
        Ok(())
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        // The (user_id, course_id, enrollment_type) constraint can still
        // fire here when a differently-keyed record carries the same triple.
        sqlx::query(
            r#"
            INSERT INTO enrollments
                (id, user_id, course_id, course_section_id, enrollment_type,
                 role, role_id, enrollment_state, created_at, updated_at,
                 last_activity_at, last_attended_at, total_activity_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                course_id = EXCLUDED.course_id,
                course_section_id = EXCLUDED.course_section_id,
                enrollment_type = EXCLUDED.enrollment_type,
                role = EXCLUDED.role,
                role_id = EXCLUDED.role_id,
                enrollment_state = EXCLUDED.enrollment_state,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                last_activity_at = EXCLUDED.last_activity_at,
                last_attended_at = EXCLUDED.last_attended_at,
                total_activity_time = EXCLUDED.total_activity_time
            "#,
        )
        .bind(enrollment.id)
        .bind(enrollment.user_id)
        .bind(enrollment.course_id)
        .bind(enrollment.course_section_id)
        .bind(&enrollment.enrollment_type)
        .bind(&enrollment.role)
        .bind(enrollment.role_id)
        .bind(&enrollment.enrollment_state)
        .bind(enrollment.created_at)
        .bind(enrollment.updated_at)
        .bind(enrollment.last_activity_at)
        .bind(enrollment.last_attended_at)
        .bind(enrollment.total_activity_time)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_db(e, "enrollment", enrollment.id))?;
        Ok(())
    }

    async fn course_exists(&self, id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM courses WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn section_exists(&self, id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM course_sections WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
