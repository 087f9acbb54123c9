//! `audio_jobs` table operations

use crate::db::retry::retry_on_lock;
use crate::models::{DenoiseMethod, Job, JobStatus, StorageRef};
use crate::sinks::{JobMetadata, JobStore};
use async_trait::async_trait;
use blinky_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Guard appended to every state-changing update
const NOT_TERMINAL: &str = "status NOT IN ('done', 'failed')";

/// [`JobStore`] backed by the worker's SQLite database
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: 5000,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Jobs in `status`, oldest first
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!("{} WHERE status = ? ORDER BY created_at", SELECT_JOB))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }
}

const SELECT_JOB: &str = r#"
    SELECT id, input_path, output_path, status, progress, error_msg,
           s3_bucket, s3_key, s3_version_id, duration_sec, loudness_json,
           noise_level, denoise_method, created_at, started_at, finished_at
    FROM audio_jobs
"#;

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let id = job.id.to_string();
        let created_at = job.created_at.to_rfc3339();

        retry_on_lock("create_job", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO audio_jobs (
                    id, input_path, output_path, status, progress, denoise_method, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&id)
            .bind(&job.input_path)
            .bind(&job.output_path)
            .bind(job.status.as_str())
            .bind(job.progress as i64)
            .bind(job.denoise_method.as_str())
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn set_started(&self, id: Uuid) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE audio_jobs SET status = 'processing', started_at = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );

        let affected = retry_on_lock("set_started", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(&now)
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await?;
        log_if_untouched("set_started", &id, affected);
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: u8) -> Result<()> {
        let id = id.to_string();
        let sql = format!(
            "UPDATE audio_jobs SET progress = MAX(progress, ?) WHERE id = ? AND {}",
            NOT_TERMINAL
        );

        let affected = retry_on_lock("update_progress", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(progress.min(100) as i64)
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await?;
        log_if_untouched("update_progress", &id, affected);
        Ok(())
    }

    async fn set_finished(&self, id: Uuid) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE audio_jobs SET status = 'done', finished_at = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );

        let affected = retry_on_lock("set_finished", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(&now)
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await?;
        log_if_untouched("set_finished", &id, affected);
        Ok(())
    }

    async fn set_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE audio_jobs SET status = 'failed', error_msg = ?, finished_at = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );

        let affected = retry_on_lock("set_failed", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(reason)
                .bind(&now)
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await?;
        log_if_untouched("set_failed", &id, affected);
        Ok(())
    }

    async fn update_storage(&self, id: Uuid, storage: &StorageRef) -> Result<()> {
        let id = id.to_string();

        let sql = format!(
            "UPDATE audio_jobs SET s3_bucket = ?, s3_key = ?, s3_version_id = ? WHERE id = ? AND {}",
            NOT_TERMINAL
        );

        let affected = retry_on_lock("update_storage", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(&storage.bucket)
                .bind(&storage.key)
                .bind(&storage.version_id)
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await?;
        log_if_untouched("update_storage", &id, affected);
        Ok(())
    }

    async fn update_metadata(&self, id: Uuid, metadata: &JobMetadata) -> Result<()> {
        let id = id.to_string();

        let sql = format!(
            r#"
            UPDATE audio_jobs
            SET duration_sec = ?, loudness_json = ?, noise_level = ?, denoise_method = ?
            WHERE id = ? AND {}
            "#,
            NOT_TERMINAL
        );

        let affected = retry_on_lock("update_metadata", self.max_lock_wait_ms, || async {
            Ok(sqlx::query(&sql)
                .bind(metadata.duration_sec)
                .bind(&metadata.loudness_json)
                .bind(metadata.noise_level)
                .bind(metadata.denoise_method.as_str())
                .bind(&id)
                .execute(&self.pool)
                .await?
                .rows_affected())
        })
        .await?;
        log_if_untouched("update_metadata", &id, affected);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }
}

fn log_if_untouched(operation: &str, id: &str, affected: u64) {
    if affected == 0 {
        tracing::debug!(
            operation,
            job_id = id,
            "No row updated (unknown job or already terminal)"
        );
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let progress: i64 = row.get("progress");
    let denoise_method: Option<String> = row.get("denoise_method");

    let storage = match (
        row.get::<Option<String>, _>("s3_bucket"),
        row.get::<Option<String>, _>("s3_key"),
        row.get::<Option<String>, _>("s3_version_id"),
    ) {
        (Some(bucket), Some(key), version_id) => Some(StorageRef {
            bucket,
            key,
            version_id: version_id.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Job {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Invalid job id {:?} in database: {}", id, e)))?,
        input_path: row.get("input_path"),
        output_path: row.get("output_path"),
        denoise_method: denoise_method
            .as_deref()
            .and_then(DenoiseMethod::parse)
            .unwrap_or(DenoiseMethod::DefaultSpectralFilter),
        status: status
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid job status in database: {}", e)))?,
        progress: progress.clamp(0, 100) as u8,
        error_message: row.get("error_msg"),
        storage,
        duration_sec: row.get("duration_sec"),
        loudness_json: row.get("loudness_json"),
        noise_level: row.get("noise_level"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        started_at: row
            .get::<Option<String>, _>("started_at")
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        finished_at: row
            .get::<Option<String>, _>("finished_at")
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp {:?} in database: {}", raw, e)))
}
