//! Outbound collaborators of the worker
//!
//! The pipeline only talks to these traits. Production implementations:
//! [`crate::db::SqliteJobStore`], [`artifacts::LocalArtifactSink`] and
//! [`metrics::TracingMetricsSink`].

pub mod artifacts;
pub mod metrics;

use crate::models::{DenoiseMethod, Job, StorageRef};
use async_trait::async_trait;
use blinky_common::Result;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

pub use artifacts::{ArtifactError, LocalArtifactSink};
pub use metrics::{MetricsSnapshot, TracingMetricsSink};

/// Metadata persisted after a successful upload
#[derive(Debug, Clone, PartialEq)]
pub struct JobMetadata {
    pub duration_sec: Option<f64>,
    /// Serialized loudness snapshot
    pub loudness_json: Option<String>,
    pub noise_level: Option<f64>,
    pub denoise_method: DenoiseMethod,
}

/// Durable job-metadata store
///
/// Writes are last-writer-wins; implementations never move a job out of a
/// terminal state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a queued job; a no-op if the id already exists
    async fn create_job(&self, job: &Job) -> Result<()>;

    async fn set_started(&self, id: Uuid) -> Result<()>;

    async fn update_progress(&self, id: Uuid, progress: u8) -> Result<()>;

    async fn set_finished(&self, id: Uuid) -> Result<()>;

    async fn set_failed(&self, id: Uuid, reason: &str) -> Result<()>;

    async fn update_storage(&self, id: Uuid, storage: &StorageRef) -> Result<()>;

    async fn update_metadata(&self, id: Uuid, metadata: &JobMetadata) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;
}

/// Object storage for processed artifacts
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn bucket(&self) -> &str;

    /// Store `local_path` under `key`; returns the version id
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> std::result::Result<String, ArtifactError>;

    /// Time-limited retrieval URL for `key`
    async fn presigned_get(&self, key: &str) -> std::result::Result<String, ArtifactError>;
}

/// One completed job, as reported to metrics
#[derive(Debug, Clone, PartialEq)]
pub struct JobObservation {
    pub denoiser: DenoiseMethod,
    pub duration: Duration,
    pub success: bool,
    pub loudness_before: Option<f64>,
    pub loudness_after: Option<f64>,
    pub snr_before: Option<f64>,
    pub snr_after: Option<f64>,
}

impl JobObservation {
    /// SNR gain, when both sides are known
    pub fn snr_improvement(&self) -> Option<f64> {
        Some(self.snr_after? - self.snr_before?)
    }
}

/// Metrics export
pub trait MetricsSink: Send + Sync {
    /// Called once per job that reached a terminal state
    fn observe_job(&self, observation: &JobObservation);
}
