//! Job lifecycle events
//!
//! Workers publish every state change of a job on an [`EventBus`]. Status
//! views, log shippers and tests subscribe to observe progress without
//! polling the job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Job lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Worker took ownership of the job (`queued → processing`)
    JobStarted {
        job_id: Uuid,
        worker_id: usize,
        denoise_method: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress checkpoint reached
    JobProgress {
        job_id: Uuid,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// Job reached `done`
    JobFinished {
        job_id: Uuid,
        storage_key: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Job reached `failed`
    JobFailed {
        job_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Descriptor rejected before any state was touched
    JobDropped {
        raw_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Event type name, used as the log/SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            JobEvent::JobStarted { .. } => "JobStarted",
            JobEvent::JobProgress { .. } => "JobProgress",
            JobEvent::JobFinished { .. } => "JobFinished",
            JobEvent::JobFailed { .. } => "JobFailed",
            JobEvent::JobDropped { .. } => "JobDropped",
        }
    }

    /// Job the event refers to, if it was a well-formed job
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobProgress { job_id, .. }
            | JobEvent::JobFinished { job_id, .. }
            | JobEvent::JobFailed { job_id, .. } => Some(*job_id),
            JobEvent::JobDropped { .. } => None,
        }
    }
}

/// Broadcast bus for [`JobEvent`]s
///
/// Cloning is cheap; all clones publish to the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use blinky_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: JobEvent,
    ) -> Result<usize, broadcast::error::SendError<JobEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// # Examples
    ///
    /// ```
    /// use blinky_common::events::{EventBus, JobEvent};
    /// use uuid::Uuid;
    ///
    /// let event_bus = EventBus::new(16);
    ///
    /// // Nobody listening - silently dropped
    /// event_bus.emit_lossy(JobEvent::JobProgress {
    ///     job_id: Uuid::new_v4(),
    ///     progress: 20,
    ///     timestamp: chrono::Utc::now(),
    /// });
    /// ```
    pub fn emit_lossy(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
