//! Fan-out of job progress events to subscribed clients.
//!
//! Delivery is fire-and-forget: subscribers that connect after an
//! event fired recover current state by polling the job status table.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::jobs::JobStatus;

/// A single job progress event.
#[derive(Debug, Clone, Serialize)]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn new(job_id: impl Into<String>, status: JobStatus, progress: u8) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            progress,
            message: None,
            url: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Broadcast channel for job updates.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobUpdate>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Events published
    /// while nobody is listening are dropped.
    pub fn publish(&self, update: JobUpdate) {
        let _ = self.tx.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
