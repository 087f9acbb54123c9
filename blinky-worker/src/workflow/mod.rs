//! Job workflow: per-job pipeline, worker pool and job source
//!
//! ```text
//! JobSource ──mpsc──▶ [worker 0..n] ──▶ process_single_job
//!                         │
//!                         ├─ JobStore      (status, progress, metadata)
//!                         ├─ ArtifactSink  (upload, presign)
//!                         ├─ MetricsSink   (one observation per job)
//!                         └─ EventBus      (JobStarted / JobProgress / ...)
//! ```

pub mod context;
pub mod pipeline;
pub mod pool;
pub mod source;

pub use context::{StorageSettings, WorkerContext};
pub use pipeline::{process_single_job, PipelineReport};
pub use pool::WorkerPool;
pub use source::{JobSource, SourceStats};

/// Progress checkpoints
pub mod progress {
    /// Job taken by a worker
    pub const STARTED: u8 = 10;
    /// About to measure and process
    pub const PROCESSING: u8 = 20;
    /// Output written and measured
    pub const PROCESSED: u8 = 70;
    /// Uploaded and recorded
    pub const COMPLETE: u8 = 100;
}
