//! In-memory sinks that record every call

use async_trait::async_trait;
use blinky_common::{Error, Result};
use blinky_worker::models::{Job, JobStatus, StorageRef};
use blinky_worker::sinks::{ArtifactError, ArtifactSink, JobMetadata, JobObservation, JobStore, MetricsSink};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// One call made against [`MemoryJobStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Created(Uuid),
    Started(Uuid),
    Progress(Uuid, u8),
    Finished(Uuid),
    Failed(Uuid, String),
    Storage(Uuid, StorageRef),
    Metadata(Uuid, JobMetadata),
}

impl StoreCall {
    pub fn job_id(&self) -> Uuid {
        match self {
            StoreCall::Created(id)
            | StoreCall::Started(id)
            | StoreCall::Progress(id, _)
            | StoreCall::Finished(id)
            | StoreCall::Failed(id, _)
            | StoreCall::Storage(id, _)
            | StoreCall::Metadata(id, _) => *id,
        }
    }
}

/// Job store kept in memory, with a call log
#[derive(Default)]
pub struct MemoryJobStore {
    calls: Mutex<Vec<StoreCall>>,
    jobs: Mutex<HashMap<Uuid, Job>>,
    fail_metadata: bool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every metadata write fails
    pub fn failing_metadata() -> Self {
        Self {
            fail_metadata: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: Uuid) -> Vec<StoreCall> {
        self.calls().into_iter().filter(|c| c.job_id() == id).collect()
    }

    /// Progress values written for `id`, in order
    pub fn progress_of(&self, id: Uuid) -> Vec<u8> {
        self.calls_for(id)
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Progress(_, p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn failure_of(&self, id: Uuid) -> Option<String> {
        self.calls_for(id).into_iter().find_map(|c| match c {
            StoreCall::Failed(_, reason) => Some(reason),
            _ => None,
        })
    }

    pub fn status_of(&self, id: Uuid) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(&id).map(|j| j.status)
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Apply `f` to a non-terminal job
    fn update(&self, id: Uuid, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            if !job.status.is_terminal() {
                f(job);
            }
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        self.record(StoreCall::Created(job.id));
        self.jobs
            .lock()
            .unwrap()
            .entry(job.id)
            .or_insert_with(|| job.clone());
        Ok(())
    }

    async fn set_started(&self, id: Uuid) -> Result<()> {
        self.record(StoreCall::Started(id));
        self.update(id, |job| job.status = JobStatus::Processing);
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: u8) -> Result<()> {
        self.record(StoreCall::Progress(id, progress));
        self.update(id, |job| job.progress = job.progress.max(progress));
        Ok(())
    }

    async fn set_finished(&self, id: Uuid) -> Result<()> {
        self.record(StoreCall::Finished(id));
        self.update(id, |job| job.status = JobStatus::Done);
        Ok(())
    }

    async fn set_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        self.record(StoreCall::Failed(id, reason.to_string()));
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(reason.to_string());
        });
        Ok(())
    }

    async fn update_storage(&self, id: Uuid, storage: &StorageRef) -> Result<()> {
        self.record(StoreCall::Storage(id, storage.clone()));
        self.update(id, |job| job.storage = Some(storage.clone()));
        Ok(())
    }

    async fn update_metadata(&self, id: Uuid, metadata: &JobMetadata) -> Result<()> {
        if self.fail_metadata {
            return Err(Error::Internal("metadata table is locked".to_string()));
        }
        self.record(StoreCall::Metadata(id, metadata.clone()));
        self.update(id, |job| {
            job.duration_sec = metadata.duration_sec;
            job.loudness_json = metadata.loudness_json.clone();
            job.noise_level = metadata.noise_level;
        });
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }
}

/// Metrics sink that keeps every observation
#[derive(Default)]
pub struct RecordingMetrics {
    observations: Mutex<Vec<JobObservation>>,
}

impl RecordingMetrics {
    pub fn observations(&self) -> Vec<JobObservation> {
        self.observations.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn observe_job(&self, observation: &JobObservation) {
        self.observations.lock().unwrap().push(observation.clone());
    }
}

/// Bucket that rejects every upload
pub struct FailingArtifactSink;

#[async_trait]
impl ArtifactSink for FailingArtifactSink {
    fn bucket(&self) -> &str {
        "call-audio-bucket"
    }

    async fn upload(
        &self,
        _local_path: &Path,
        _key: &str,
        _content_type: &str,
    ) -> std::result::Result<String, ArtifactError> {
        Err(ArtifactError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "bucket is read-only",
        )))
    }

    async fn presigned_get(&self, key: &str) -> std::result::Result<String, ArtifactError> {
        Err(ArtifactError::NotFound(key.to_string()))
    }
}
