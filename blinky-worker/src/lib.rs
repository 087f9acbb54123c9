//! blinky-worker library interface
//!
//! Call-audio denoise and loudness normalization worker. Exposes the
//! pipeline, sinks and worker pool for the binary and integration tests.

pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sinks;
pub mod workflow;

pub use crate::error::{WorkerError, WorkerResult};
