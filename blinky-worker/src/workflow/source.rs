//! Newline-delimited JSON job source
//!
//! Each non-empty line is one descriptor:
//! `{"id": "...", "input_path": "...", "output_path": "...", "denoise_method": "..."}`.
//! Valid descriptors are recorded as queued jobs and pushed onto the bounded
//! queue (back-pressure comes from the queue). Malformed lines are dropped.

use crate::error::WorkerError;
use crate::models::{Job, JobDescriptor};
use crate::sinks::JobStore;
use blinky_common::events::{EventBus, JobEvent};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Raw id reported for lines that are not JSON descriptors
const UNPARSED_ID: &str = "<unparsed>";

/// Counts from one run of the source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub accepted: usize,
    pub dropped: usize,
}

/// Reads descriptors from `reader` into the job queue
pub struct JobSource<R> {
    reader: R,
    sender: mpsc::Sender<JobDescriptor>,
    store: Arc<dyn JobStore>,
    events: EventBus,
}

impl<R> JobSource<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(
        reader: R,
        sender: mpsc::Sender<JobDescriptor>,
        store: Arc<dyn JobStore>,
        events: EventBus,
    ) -> Self {
        Self {
            reader,
            sender,
            store,
            events,
        }
    }

    /// Read until EOF, cancellation or a closed queue
    ///
    /// The sender is dropped on return, which closes the queue once the
    /// workers have drained it.
    pub async fn run(self, cancel: CancellationToken) -> Result<SourceStats, WorkerError> {
        let Self {
            reader,
            sender,
            store,
            events,
        } = self;
        let mut lines = reader.lines();
        let mut stats = SourceStats::default();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let descriptor = match serde_json::from_str::<JobDescriptor>(line) {
                Ok(d) => d,
                Err(e) => {
                    drop_line(&events, UNPARSED_ID, &e.to_string(), &mut stats);
                    continue;
                }
            };

            let job = match Job::from_descriptor(&descriptor) {
                Ok(job) => job,
                Err(e) => {
                    drop_line(&events, &descriptor.id, &e.to_string(), &mut stats);
                    continue;
                }
            };

            if let Err(e) = store.create_job(&job).await {
                warn!(job_id = %job.id, error = %e, "Failed to record queued job");
            }

            debug!(job_id = %job.id, denoise_method = %job.denoise_method, "Job enqueued");
            if sender.send(descriptor).await.is_err() {
                warn!("Job queue closed, stopping source");
                return Err(WorkerError::QueueClosed);
            }
            stats.accepted += 1;
        }

        info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            "Job source finished"
        );
        Ok(stats)
    }
}

fn drop_line(events: &EventBus, raw_id: &str, reason: &str, stats: &mut SourceStats) {
    warn!(raw_id, reason, "Dropping malformed job descriptor");
    stats.dropped += 1;
    events.emit_lossy(JobEvent::JobDropped {
        raw_id: raw_id.to_string(),
        reason: reason.to_string(),
        timestamp: Utc::now(),
    });
}
