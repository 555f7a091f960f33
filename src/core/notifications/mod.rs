//! Job change notifications for observers (RPC subscribers, the CLI `watch`).
//!
//! Backed by a broadcast channel: publishing never blocks the manager, and a
//! subscriber that falls behind loses the oldest messages.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::classifier::ClassifiedError;
use crate::core::models::{Job, JobId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobNotification {
    JobChanged(Job),
    JobRemoved {
        id: JobId,
    },
    ProgressOutput {
        id: JobId,
        chunk: String,
    },
    JobError {
        id: JobId,
        error: String,
        classified: ClassifiedError,
    },
}

impl JobNotification {
    pub fn job_id(&self) -> &str {
        match self {
            Self::JobChanged(job) => &job.id,
            Self::JobRemoved { id }
            | Self::ProgressOutput { id, .. }
            | Self::JobError { id, .. } => id,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<JobNotification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send to every current subscriber. Having none is not an error.
    pub fn publish(&self, notification: JobNotification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.tx.subscribe()
    }
}
