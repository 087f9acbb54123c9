//! Job lifecycle state machine
//!
//! A job moves through exactly one path:
//! QUEUED → PROCESSING → DONE | FAILED
//!
//! Terminal states are final. Progress only moves forward while the job is
//! PROCESSING.

use crate::models::DenoiseMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Job lifecycle errors
#[derive(Debug, Error, PartialEq)]
pub enum JobError {
    /// Descriptor cannot be turned into a job (bad id, empty path)
    #[error("Malformed job descriptor: {0}")]
    MalformedDescriptor(String),

    /// Transition not allowed from the current state
    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Progress would move backwards
    #[error("Progress regression: {current} -> {requested}")]
    ProgressRegression { current: u8, requested: u8 },

    /// Progress beyond 100
    #[error("Progress out of range: {0}")]
    ProgressOutOfRange(u8),
}

/// Job status as stored and reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by the submission service, waiting for a worker
    Queued,
    /// Owned by exactly one worker
    Processing,
    /// Processed and uploaded
    Done,
    /// Apply pass or upload failed, or the worker was cancelled
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::MalformedDescriptor(format!(
                "unknown job status {:?}",
                other
            ))),
        }
    }
}

/// Inbound job descriptor, as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub input_path: String,
    pub output_path: String,
    #[serde(default)]
    pub denoise_method: String,
}

/// Where the processed artifact landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_state: JobStatus,
    pub new_state: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// A unit of work and its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input_path: String,
    pub output_path: String,
    pub denoise_method: DenoiseMethod,
    pub status: JobStatus,
    /// 0-100, non-decreasing while processing
    pub progress: u8,
    /// Present only in FAILED
    pub error_message: Option<String>,
    /// Set only after a successful upload
    pub storage: Option<StorageRef>,
    pub duration_sec: Option<f64>,
    pub loudness_json: Option<String>,
    pub noise_level: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// New job in QUEUED
    pub fn queued(
        id: Uuid,
        input_path: String,
        output_path: String,
        denoise_method: DenoiseMethod,
    ) -> Self {
        Self {
            id,
            input_path,
            output_path,
            denoise_method,
            status: JobStatus::Queued,
            progress: 0,
            error_message: None,
            storage: None,
            duration_sec: None,
            loudness_json: None,
            noise_level: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Validate a descriptor and build the queued job it describes
    pub fn from_descriptor(descriptor: &JobDescriptor) -> Result<Self, JobError> {
        let id = blinky_common::uuid_utils::parse_job_id(&descriptor.id)
            .map_err(|e| JobError::MalformedDescriptor(e.to_string()))?;

        if descriptor.input_path.trim().is_empty() {
            return Err(JobError::MalformedDescriptor("input path is empty".to_string()));
        }
        if descriptor.output_path.trim().is_empty() {
            return Err(JobError::MalformedDescriptor("output path is empty".to_string()));
        }

        Ok(Self::queued(
            id,
            descriptor.input_path.clone(),
            descriptor.output_path.clone(),
            DenoiseMethod::parse_lenient(&descriptor.denoise_method),
        ))
    }

    /// QUEUED → PROCESSING
    pub fn start(&mut self) -> Result<StateTransition, JobError> {
        if self.status != JobStatus::Queued {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.started_at = Some(Utc::now());
        Ok(self.transition_to(JobStatus::Processing))
    }

    /// Record a progress checkpoint
    pub fn advance_progress(&mut self, progress: u8) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        if progress > 100 {
            return Err(JobError::ProgressOutOfRange(progress));
        }
        if progress < self.progress {
            return Err(JobError::ProgressRegression {
                current: self.progress,
                requested: progress,
            });
        }
        self.progress = progress;
        Ok(())
    }

    /// Attach the uploaded artifact location
    pub fn attach_storage(&mut self, storage: StorageRef) -> Result<(), JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Done,
            });
        }
        self.storage = Some(storage);
        Ok(())
    }

    /// PROCESSING → DONE
    pub fn finish(&mut self) -> Result<StateTransition, JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Done,
            });
        }
        Ok(self.transition_to(JobStatus::Done))
    }

    /// PROCESSING → FAILED
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<StateTransition, JobError> {
        if self.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.error_message = Some(reason.into());
        Ok(self.transition_to(JobStatus::Failed))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition_to(&mut self, new_state: JobStatus) -> StateTransition {
        let transition = StateTransition {
            job_id: self.id,
            old_state: self.status,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.status = new_state;

        if new_state.is_terminal() {
            self.finished_at = Some(transition.transitioned_at);
        }

        transition
    }
}
