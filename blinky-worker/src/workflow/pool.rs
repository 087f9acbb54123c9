//! Fixed-size worker pool
//!
//! All workers share one receiver behind an async mutex, so every
//! descriptor reaches exactly one worker. Each worker handles one job at a
//! time. Workers exit when the queue closes and drains, or when the pool's
//! cancellation token fires.

use super::pipeline::process_single_job;
use super::WorkerContext;
use crate::models::{Job, JobDescriptor};
use blinky_common::events::JobEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<JobDescriptor>>>;

/// Running worker tasks
pub struct WorkerPool {
    handles: Vec<JoinHandle<usize>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `concurrency` workers draining `receiver`
    pub fn spawn(
        ctx: Arc<WorkerContext>,
        receiver: mpsc::Receiver<JobDescriptor>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
        let handles = (0..concurrency.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&ctx),
                    Arc::clone(&receiver),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(workers = concurrency.max(1), "Worker pool started");
        Self { handles, cancel }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Cancel in-flight jobs and stop all workers
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every worker; returns the number of jobs processed
    pub async fn join(self) -> usize {
        let mut processed = 0;
        for handle in self.handles {
            match handle.await {
                Ok(count) => processed += count,
                Err(e) => warn!(error = %e, "Worker task panicked"),
            }
        }
        processed
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    receiver: SharedReceiver,
    cancel: CancellationToken,
) -> usize {
    debug!(worker = worker_id, "Worker started");
    let mut processed = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            descriptor = async { receiver.lock().await.recv().await } => descriptor,
        };
        let Some(descriptor) = next else {
            break;
        };

        let job = match Job::from_descriptor(&descriptor) {
            Ok(job) => job,
            Err(e) => {
                warn!(worker = worker_id, raw_id = %descriptor.id, error = %e, "Dropping job descriptor");
                ctx.events.emit_lossy(JobEvent::JobDropped {
                    raw_id: descriptor.id.clone(),
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                continue;
            }
        };

        process_single_job(&ctx, worker_id, job, &cancel).await;
        processed += 1;
    }

    debug!(worker = worker_id, processed, "Worker stopped");
    processed
}
