//! Database Test Utilities
//!
//! Utilities for job-store testing and schema validation

use anyhow::Result;
use blinky_worker::db::{self, SqliteJobStore};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Column information from PRAGMA table_info
#[derive(Debug, sqlx::FromRow)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub r#type: String,
    pub notnull: i32,
    pub dflt_value: Option<String>,
    pub pk: i32,
}

/// Create temporary test database with the worker tables
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_blinky.db");

    let pool = db::init_database_pool(&db_path).await?;

    Ok((temp_dir, pool))
}

/// Job store on a temporary database
pub async fn create_test_store() -> Result<(TempDir, SqliteJobStore)> {
    let (temp_dir, pool) = create_test_db().await?;
    Ok((temp_dir, SqliteJobStore::new(pool).with_max_lock_wait(1000)))
}

/// Get table schema information
pub async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let columns = sqlx::query_as::<_, ColumnInfo>(&query)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

/// Check if table has specific column
pub async fn has_column(pool: &SqlitePool, table_name: &str, column_name: &str) -> Result<bool> {
    let columns = get_table_columns(pool, table_name).await?;
    Ok(columns.iter().any(|c| c.name == column_name))
}
