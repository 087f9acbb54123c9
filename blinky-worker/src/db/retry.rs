//! Retry on SQLite lock contention
//!
//! Several workers write job rows concurrently; a write that hits
//! "database is locked" backs off exponentially (10 ms doubling, capped at
//! 1 s) until `max_wait_ms` has elapsed. Any other error returns at once.

use blinky_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_lock_error(&err) {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if elapsed >= max_duration {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Database operation failed: max retry time exceeded"
            );
            return Err(Error::Internal(format!(
                "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                attempt,
                elapsed.as_millis(),
                max_wait_ms
            )));
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, will retry after backoff"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(1000);
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        _ => false,
    }
}
