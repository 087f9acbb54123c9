//! Error types for blinky-worker

use crate::audio::EngineError;
use thiserror::Error;

/// Worker-level errors
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration, database or IO error from blinky-common
    #[error(transparent)]
    Common(#[from] blinky_common::Error),

    /// Engine could not be used
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Reading the job source failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// All workers are gone
    #[error("Job queue closed")]
    QueueClosed,
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
