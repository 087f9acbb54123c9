//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a job identifier
///
/// The nil UUID is rejected: it cannot identify a unique job.
pub fn parse_job_id(s: &str) -> Result<Uuid> {
    let id = Uuid::parse_str(s.trim())
        .map_err(|e| Error::InvalidInput(format!("invalid job id {:?}: {}", s, e)))?;
    if id.is_nil() {
        return Err(Error::InvalidInput("job id must not be the nil UUID".to_string()));
    }
    Ok(id)
}
