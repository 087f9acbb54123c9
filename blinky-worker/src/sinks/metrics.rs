//! Structured-log metrics sink

use super::{JobObservation, MetricsSink};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters accumulated since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
}

/// Emits one `tracing` event per job and keeps running totals
#[derive(Debug, Default)]
pub struct TracingMetricsSink {
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl TracingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for TracingMetricsSink {
    fn observe_job(&self, o: &JobObservation) {
        let counter = if o.success { &self.succeeded } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
        let duration_ms = u64::try_from(o.duration.as_millis()).unwrap_or(u64::MAX);
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);

        info!(
            target: "blinky_worker::metrics",
            result = if o.success { "success" } else { "failed" },
            denoiser = %o.denoiser,
            duration_ms,
            loudness_before = ?o.loudness_before,
            loudness_after = ?o.loudness_after,
            snr_before = ?o.snr_before,
            snr_after = ?o.snr_after,
            snr_improvement = ?o.snr_improvement(),
            "job observed"
        );
    }
}
