//! Worker context wired to fakes
//!
//! Owns a temporary directory that holds the call inputs, the outputs, the
//! denoise scratch area and the artifact bucket. Keep the harness alive for
//! the duration of the test.

use super::fake_engine::{FakeRunner, FFMPEG, FFPROBE};
use super::recording::{FailingArtifactSink, MemoryJobStore, RecordingMetrics};
use blinky_common::events::EventBus;
use blinky_worker::audio::Engine;
use blinky_worker::config::WorkerConfig;
use blinky_worker::models::{DenoiseMethod, Job, JobDescriptor};
use blinky_worker::sinks::{ArtifactSink, JobStore, LocalArtifactSink};
use blinky_worker::workflow::{process_single_job, PipelineReport, WorkerContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct Harness {
    pub dir: TempDir,
    pub runner: Arc<FakeRunner>,
    pub store: Arc<MemoryJobStore>,
    pub metrics: Arc<RecordingMetrics>,
    pub events: EventBus,
    pub config: WorkerConfig,
    pub ctx: Arc<WorkerContext>,
}

pub struct HarnessBuilder {
    runner: FakeRunner,
    store: MemoryJobStore,
    configure: Option<Box<dyn FnOnce(&mut WorkerConfig, &Path)>>,
    failing_artifacts: bool,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            runner: FakeRunner::new(),
            store: MemoryJobStore::new(),
            configure: None,
            failing_artifacts: false,
        }
    }

    /// Harness with the default fakes
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    /// Descriptor for a fresh input file
    pub fn descriptor(&self, method: DenoiseMethod) -> JobDescriptor {
        let id = Uuid::new_v4();
        let input = self.dir.path().join("calls").join(format!("{}.wav", id));
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        std::fs::write(&input, b"RIFF raw call audio").unwrap();
        let output = self.dir.path().join("out").join(format!("{}-clean.wav", id));

        JobDescriptor {
            id: id.to_string(),
            input_path: input.to_string_lossy().to_string(),
            output_path: output.to_string_lossy().to_string(),
            denoise_method: method.as_str().to_string(),
        }
    }

    /// Queued job for a fresh input file
    pub fn job(&self, method: DenoiseMethod) -> Job {
        Job::from_descriptor(&self.descriptor(method)).unwrap()
    }

    /// Record `job` as queued and run it to a terminal state
    pub async fn run(&self, job: Job) -> PipelineReport {
        self.run_with(job, &CancellationToken::new()).await
    }

    pub async fn run_with(&self, job: Job, cancel: &CancellationToken) -> PipelineReport {
        self.store.create_job(&job).await.unwrap();
        process_single_job(&self.ctx, 0, job, cancel).await
    }
}

impl HarnessBuilder {
    pub fn runner(mut self, runner: FakeRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn store(mut self, store: MemoryJobStore) -> Self {
        self.store = store;
        self
    }

    /// Adjust the configuration; the closure gets the harness directory
    pub fn configure(mut self, f: impl FnOnce(&mut WorkerConfig, &Path) + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    pub fn failing_artifacts(mut self) -> Self {
        self.failing_artifacts = true;
        self
    }

    pub fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();

        let mut config = WorkerConfig::default();
        config.engine.ffmpeg_path = FFMPEG.to_string();
        config.engine.ffprobe_path = FFPROBE.to_string();
        config.denoise.external_program = "python3".to_string();
        config.denoise.scratch_dir = Some(dir.path().join("scratch"));
        config.worker.concurrency = 2;
        if let Some(configure) = self.configure {
            configure(&mut config, dir.path());
        }
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let runner = Arc::new(self.runner);
        let store = Arc::new(self.store);
        let metrics = Arc::new(RecordingMetrics::default());
        let events = EventBus::new(config.worker.event_capacity);

        let artifacts: Arc<dyn ArtifactSink> = if self.failing_artifacts {
            Arc::new(FailingArtifactSink)
        } else {
            Arc::new(LocalArtifactSink::new(
                dir.path().join("artifacts"),
                config.storage.bucket.clone(),
                Duration::from_secs(config.storage.presign_expiry_secs),
            ))
        };

        let engine = Engine::new(runner.clone(), FFMPEG, FFPROBE);
        let ctx = Arc::new(WorkerContext::from_config(
            &config,
            engine,
            store.clone(),
            artifacts,
            metrics.clone(),
            events.clone(),
        ));

        Harness {
            dir,
            runner,
            store,
            metrics,
            events,
            config,
            ctx,
        }
    }
}
