//! Job database (SQLite)

pub mod jobs;
pub mod retry;

pub use jobs::SqliteJobStore;
pub use retry::retry_on_lock;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Opens (or creates) the SQLite file and makes sure the tables exist.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create worker tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audio_jobs (
            id TEXT PRIMARY KEY,
            input_path TEXT NOT NULL,
            output_path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            progress INTEGER NOT NULL DEFAULT 0,
            error_msg TEXT,
            s3_bucket TEXT,
            s3_key TEXT,
            s3_version_id TEXT,
            duration_sec REAL,
            loudness_json TEXT,
            noise_level REAL,
            denoise_method TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audio_jobs_status ON audio_jobs(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (audio_jobs)");

    Ok(())
}
