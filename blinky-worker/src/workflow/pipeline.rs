//! Per-job processing pipeline
//!
//! One job, start to terminal state:
//!
//! 1. `queued → processing`, progress 10
//! 2. progress 20, input quality + loudness (best-effort)
//! 3. denoise resolution, apply pass (failure is terminal, no retry)
//! 4. output quality + loudness (best-effort), progress 70
//! 5. duration probe and noise floor (best-effort)
//! 6. upload (failure is terminal, no retry)
//! 7. storage reference + metadata, presigned URL (best-effort)
//! 8. progress 100, `done`
//!
//! Every sub-operation is raced against the worker's cancellation token. A
//! cancelled job is marked failed with reason `"cancelled"`; dropping the
//! in-flight future kills any child process it started.

use super::progress;
use super::WorkerContext;
use crate::audio::{loudness, quality, ApplyPass};
use crate::models::{
    Job, JobStatus, LoudnessMeasurement, LoudnessSnapshot, Measured, QualityMetrics, StorageRef,
};
use crate::sinks::artifacts::object_key;
use crate::sinks::{JobMetadata, JobObservation};
use blinky_common::events::JobEvent;
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Failure reason recorded for cancelled jobs
pub const CANCELLED_REASON: &str = "cancelled";

const NOT_MEASURED: &str = "not measured";

/// Outcome of one job
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Input actually fed to the apply pass
    pub apply_input: Option<PathBuf>,
    pub filter_chain: Option<String>,
    /// Why the requested denoise method was not used as asked
    pub denoise_degraded: Option<String>,
    pub quality_before: Measured<QualityMetrics>,
    pub quality_after: Measured<QualityMetrics>,
    pub loudness_before: Measured<LoudnessMeasurement>,
    pub loudness_after: Measured<LoudnessMeasurement>,
    pub duration_sec: Measured<f64>,
    pub noise_floor: Measured<f64>,
    pub storage: Option<StorageRef>,
    pub presigned_url: Measured<String>,
    pub elapsed: Duration,
}

impl PipelineReport {
    fn new(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            error: None,
            apply_input: None,
            filter_chain: None,
            denoise_degraded: None,
            quality_before: Measured::absent(NOT_MEASURED),
            quality_after: Measured::absent(NOT_MEASURED),
            loudness_before: Measured::absent(NOT_MEASURED),
            loudness_after: Measured::absent(NOT_MEASURED),
            duration_sec: Measured::absent(NOT_MEASURED),
            noise_floor: Measured::absent(NOT_MEASURED),
            storage: None,
            presigned_url: Measured::absent(NOT_MEASURED),
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// Loudness snapshot persisted with the job
    pub fn loudness_snapshot(&self) -> LoudnessSnapshot {
        LoudnessSnapshot {
            before: self.loudness_before.value().cloned(),
            after: self.loudness_after.value().cloned(),
        }
    }
}

/// Why the stages stopped early
enum StageFailure {
    Terminal(String),
    Cancelled,
}

struct Cancelled;

impl From<Cancelled> for StageFailure {
    fn from(_: Cancelled) -> Self {
        StageFailure::Cancelled
    }
}

async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

/// Drive one job to a terminal state
///
/// Never returns an error: every failure ends up in the job's state and in
/// the report. The metrics sink is called once, whatever the outcome, for
/// every job that gets started. Jobs already terminal in the store are
/// skipped untouched.
pub async fn process_single_job(
    ctx: &WorkerContext,
    worker_id: usize,
    mut job: Job,
    cancel: &CancellationToken,
) -> PipelineReport {
    let started = Instant::now();
    let mut report = PipelineReport::new(&job);

    // A redelivered descriptor must not reprocess a finished job
    match ctx.store.get_job(job.id).await {
        Ok(Some(stored)) if stored.status.is_terminal() => {
            info!(
                job_id = %job.id,
                worker = worker_id,
                status = %stored.status,
                "Job already finished, skipping"
            );
            report.status = stored.status;
            report.error = Some(format!("job already {}", stored.status));
            return report;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(job_id = %job.id, worker = worker_id, error = %e, "Failed to read stored job state");
        }
    }

    if let Err(e) = job.start() {
        error!(job_id = %job.id, worker = worker_id, error = %e, "Job cannot be started");
        report.error = Some(e.to_string());
        return report;
    }
    if let Err(e) = ctx.store.set_started(job.id).await {
        warn!(job_id = %job.id, worker = worker_id, error = %e, "Failed to record job start");
    }
    ctx.events.emit_lossy(JobEvent::JobStarted {
        job_id: job.id,
        worker_id,
        denoise_method: job.denoise_method.to_string(),
        timestamp: Utc::now(),
    });
    info!(
        job_id = %job.id,
        worker = worker_id,
        denoise_method = %job.denoise_method,
        "Processing job"
    );
    checkpoint(ctx, &mut job, progress::STARTED).await;

    match run_stages(ctx, worker_id, &mut job, &mut report, cancel).await {
        Ok(()) => finish_job(ctx, &mut job, &report, started).await,
        Err(StageFailure::Terminal(reason)) => fail_job(ctx, worker_id, &mut job, reason).await,
        Err(StageFailure::Cancelled) => {
            warn!(job_id = %job.id, worker = worker_id, "Job cancelled before completion");
            fail_job(ctx, worker_id, &mut job, CANCELLED_REASON.to_string()).await
        }
    }

    report.status = job.status;
    report.error = job.error_message.clone();
    report.elapsed = started.elapsed();

    ctx.metrics.observe_job(&JobObservation {
        denoiser: job.denoise_method,
        duration: report.elapsed,
        success: report.succeeded(),
        loudness_before: report.loudness_before.and_then_value(LoudnessMeasurement::integrated),
        loudness_after: report.loudness_after.and_then_value(LoudnessMeasurement::integrated),
        snr_before: report.quality_before.and_then_value(|q| q.snr),
        snr_after: report.quality_after.and_then_value(|q| q.snr),
    });

    report
}

async fn run_stages(
    ctx: &WorkerContext,
    worker_id: usize,
    job: &mut Job,
    report: &mut PipelineReport,
    cancel: &CancellationToken,
) -> Result<(), StageFailure> {
    let request = ctx.request_for(job.denoise_method);
    let input = PathBuf::from(&job.input_path);
    let output = PathBuf::from(&job.output_path);
    let measurement = ctx.timeouts.measurement();

    checkpoint(ctx, job, progress::PROCESSING).await;

    report.quality_before = Measured::from_result(
        guarded(cancel, quality::estimate_quality(&ctx.engine, &input, measurement)).await?,
    );
    report.loudness_before = Measured::from_result(
        guarded(
            cancel,
            loudness::measure_loudness(&ctx.engine, &input, &request, measurement),
        )
        .await?,
    );
    log_absent(job.id, "input quality", &report.quality_before);
    log_absent(job.id, "input loudness", &report.loudness_before);

    let resolution = guarded(
        cancel,
        ctx.denoiser.resolve(job.id, request.denoise_method(), &input),
    )
    .await?;
    report.denoise_degraded = resolution.degraded.clone();

    let pass = ApplyPass::new(
        &request,
        &resolution.input_path,
        &output,
        resolution.stage.as_ref(),
    );
    report.apply_input = Some(pass.input.clone());
    report.filter_chain = Some(pass.chain.to_filter_string());
    debug!(
        job_id = %job.id,
        worker = worker_id,
        input = %pass.input.display(),
        chain = %pass.chain,
        "Running apply pass"
    );

    let applied = guarded(cancel, ctx.engine.apply(&pass, ctx.timeouts.apply())).await;
    resolution.cleanup().await;
    if let Err(e) = applied? {
        error!(job_id = %job.id, worker = worker_id, error = %e, "Apply pass failed");
        return Err(StageFailure::Terminal(e.diagnostic_text()));
    }

    report.quality_after = Measured::from_result(
        guarded(cancel, quality::estimate_quality(&ctx.engine, &output, measurement)).await?,
    );
    report.loudness_after = Measured::from_result(
        guarded(
            cancel,
            loudness::measure_loudness(&ctx.engine, &output, &request, measurement),
        )
        .await?,
    );
    log_absent(job.id, "output quality", &report.quality_after);
    log_absent(job.id, "output loudness", &report.loudness_after);

    checkpoint(ctx, job, progress::PROCESSED).await;

    report.duration_sec = Measured::from_result(
        guarded(cancel, ctx.engine.probe_duration(&output, measurement)).await?,
    );
    report.noise_floor = Measured::from_result(
        guarded(cancel, quality::estimate_noise_floor(&ctx.engine, &output, measurement)).await?,
    );
    log_absent(job.id, "duration", &report.duration_sec);
    log_absent(job.id, "noise floor", &report.noise_floor);

    let storage = upload(ctx, worker_id, job.id, &output, cancel).await?;
    if let Err(e) = job.attach_storage(storage.clone()) {
        warn!(job_id = %job.id, error = %e, "Storage reference not attached");
    }
    if let Err(e) = ctx.store.update_storage(job.id, &storage).await {
        warn!(job_id = %job.id, worker = worker_id, error = %e, "Failed to record storage reference");
    }
    report.storage = Some(storage.clone());

    job.duration_sec = report.duration_sec.value().copied();
    job.noise_level = report.noise_floor.value().copied();
    job.loudness_json = match serde_json::to_string(&report.loudness_snapshot()) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Failed to serialize loudness snapshot");
            None
        }
    };
    let metadata = JobMetadata {
        duration_sec: job.duration_sec,
        loudness_json: job.loudness_json.clone(),
        noise_level: job.noise_level,
        denoise_method: job.denoise_method,
    };
    if let Err(e) = ctx.store.update_metadata(job.id, &metadata).await {
        warn!(job_id = %job.id, worker = worker_id, error = %e, "Failed to record job metadata");
    }

    report.presigned_url =
        Measured::from_result(guarded(cancel, ctx.artifacts.presigned_get(&storage.key)).await?);
    log_absent(job.id, "presigned URL", &report.presigned_url);

    checkpoint(ctx, job, progress::COMPLETE).await;
    Ok(())
}

async fn upload(
    ctx: &WorkerContext,
    worker_id: usize,
    job_id: Uuid,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<StorageRef, StageFailure> {
    let key = object_key(&ctx.storage.key_prefix, output);
    let timeout = ctx.timeouts.upload();

    let result = guarded(
        cancel,
        tokio::time::timeout(
            timeout,
            ctx.artifacts.upload(output, &key, &ctx.storage.content_type),
        ),
    )
    .await?;

    let version_id = match result {
        Ok(Ok(version_id)) => version_id,
        Ok(Err(e)) => {
            error!(job_id = %job_id, worker = worker_id, key = %key, error = %e, "Upload failed");
            return Err(StageFailure::Terminal(format!("upload failed: {}", e)));
        }
        Err(_) => {
            error!(job_id = %job_id, worker = worker_id, key = %key, "Upload timed out");
            return Err(StageFailure::Terminal(format!(
                "upload failed: timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    Ok(StorageRef {
        bucket: ctx.artifacts.bucket().to_string(),
        key,
        version_id,
    })
}

async fn checkpoint(ctx: &WorkerContext, job: &mut Job, value: u8) {
    if let Err(e) = job.advance_progress(value) {
        warn!(job_id = %job.id, error = %e, "Progress checkpoint rejected");
        return;
    }
    if let Err(e) = ctx.store.update_progress(job.id, value).await {
        warn!(job_id = %job.id, progress = value, error = %e, "Failed to record progress");
    }
    ctx.events.emit_lossy(JobEvent::JobProgress {
        job_id: job.id,
        progress: value,
        timestamp: Utc::now(),
    });
}

async fn finish_job(ctx: &WorkerContext, job: &mut Job, report: &PipelineReport, started: Instant) {
    if let Err(e) = job.finish() {
        error!(job_id = %job.id, error = %e, "Job cannot be finished");
        return;
    }
    if let Err(e) = ctx.store.set_finished(job.id).await {
        warn!(job_id = %job.id, error = %e, "Failed to record job completion");
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let storage_key = report
        .storage
        .as_ref()
        .map(|s| s.key.clone())
        .unwrap_or_default();
    info!(
        job_id = %job.id,
        duration_ms,
        key = %storage_key,
        presigned_url = ?report.presigned_url.value(),
        snr_before = ?report.quality_before.and_then_value(|q| q.snr),
        snr_after = ?report.quality_after.and_then_value(|q| q.snr),
        "Job done"
    );
    ctx.events.emit_lossy(JobEvent::JobFinished {
        job_id: job.id,
        storage_key,
        duration_ms,
        timestamp: Utc::now(),
    });
}

async fn fail_job(ctx: &WorkerContext, worker_id: usize, job: &mut Job, reason: String) {
    if let Err(e) = job.fail(reason.clone()) {
        error!(job_id = %job.id, error = %e, "Job cannot be failed");
        return;
    }
    if let Err(e) = ctx.store.set_failed(job.id, &reason).await {
        error!(job_id = %job.id, worker = worker_id, error = %e, "Failed to record job failure");
    }
    ctx.events.emit_lossy(JobEvent::JobFailed {
        job_id: job.id,
        reason,
        timestamp: Utc::now(),
    });
}

fn log_absent<T>(job_id: Uuid, what: &str, measured: &Measured<T>) {
    if let Some(reason) = measured.absent_reason() {
        warn!(job_id = %job_id, measurement = what, reason, "Measurement skipped");
    }
}
