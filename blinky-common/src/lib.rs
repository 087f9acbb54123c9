//! # Blinky Common Library
//!
//! Shared code for the Blinky call-audio services:
//! - Error and result types
//! - Configuration loading (TOML + environment) and data folder resolution
//! - Job lifecycle events and the broadcast event bus
//! - UUID helpers for job identifiers

pub mod config;
pub mod error;
pub mod events;
pub mod uuid_utils;

pub use error::{Error, Result};
