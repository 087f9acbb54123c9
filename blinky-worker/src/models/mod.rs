//! Data models for blinky-worker
//!
//! - Job lifecycle state machine
//! - Processing parameters and per-job requests
//! - Quality and loudness measurement results

pub mod job;
pub mod metrics;
pub mod processing;

pub use job::{Job, JobDescriptor, JobError, JobStatus, StateTransition, StorageRef};
pub use metrics::{LoudnessKey, LoudnessMeasurement, LoudnessSnapshot, Measured, QualityMetrics};
pub use processing::{
    CompressorSpec, DenoiseMethod, LimiterSpec, ProcessingParameters, ProcessingRequest,
};
