//! Test Helper Utilities
//!
//! Shared utilities for testing blinky-worker

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_engine;
pub mod harness;
pub mod recording;

// Re-export commonly used items; not every test crate uses all of them
#[allow(unused_imports)]
pub use db_utils::{create_test_db, create_test_store, get_table_columns, has_column};
#[allow(unused_imports)]
pub use fake_engine::{DenoiserBehaviour, FakeRunner};
#[allow(unused_imports)]
pub use harness::Harness;
#[allow(unused_imports)]
pub use recording::{MemoryJobStore, RecordingMetrics, StoreCall};

use blinky_common::events::JobEvent;
use tokio::sync::broadcast;

/// Everything currently buffered on an event receiver
pub fn drain_events(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
