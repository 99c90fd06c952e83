//! In-process job lifecycle events backed by a `tokio::sync::broadcast`
//! channel.
//!
//! Anything waiting on a job (an HTTP long-poll, a test, a notifier)
//! subscribes to the [`JobEventBus`] instead of polling the registry.

use analyst_core::types::JobId;
use serde::Serialize;
use tokio::sync::broadcast;

/// Something that happened to a regional analysis job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The job's assembler exists and its tiles are queued for dispatch.
    Registered { job_id: JobId, total: u32 },

    /// Every tile arrived and the output grid was stored.
    Completed { job_id: JobId, output_key: String },

    /// The job will never finish; `reason` says why.
    Failed { job_id: JobId, reason: String },

    /// The job's assembler was dropped from the registry.
    Evicted { job_id: JobId },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Registered { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Evicted { job_id } => *job_id,
        }
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus for [`JobEvent`]s, shared via `Arc<JobEventBus>`.
pub struct JobEventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unread events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: JobEvent) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
