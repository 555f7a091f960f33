//! The seam between the job manager and whatever actually moves the bytes.
//!
//! An engine launches one run for a job and returns a [`TransferProcess`] the
//! manager keeps privately. Everything the run produces (output chunks, exit)
//! comes back as [`ProcessEvent`]s on the channel handed to `launch`, tagged
//! with the job id and run id so the manager can drop events from runs it has
//! already abandoned.

mod rsync;
mod simulated;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::models::{JobId, TransferInvocation};

pub use rsync::{RsyncEngine, RsyncProcess};
pub use simulated::{SimulatedEngine, SimulatedProcess};

pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransferEngineType {
    Rsync,
    Simulated,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub job_id: JobId,
    pub run_id: RunId,
    pub source: PathBuf,
    pub target: PathBuf,
    pub is_move: bool,
    pub invocation: TransferInvocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Stdout {
        job_id: JobId,
        run_id: RunId,
        chunk: String,
    },
    Stderr {
        job_id: JobId,
        run_id: RunId,
        chunk: String,
    },
    /// `code` is `None` when the process was killed by a signal.
    Exited {
        job_id: JobId,
        run_id: RunId,
        code: Option<i32>,
    },
    /// The process could not be waited on.
    Failed {
        job_id: JobId,
        run_id: RunId,
        error: String,
    },
}

impl ProcessEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Stdout { job_id, .. }
            | Self::Stderr { job_id, .. }
            | Self::Exited { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Self::Stdout { run_id, .. }
            | Self::Stderr { run_id, .. }
            | Self::Exited { run_id, .. }
            | Self::Failed { run_id, .. } => *run_id,
        }
    }
}

/// Control over one live run.
pub trait TransferProcess: Send {
    /// Pause the run in place.
    fn suspend(&self) -> Result<()>;

    /// Continue a suspended run.
    fn resume(&self) -> Result<()>;

    /// Ask the run to exit, escalating to a forced kill after `grace`.
    /// Returns immediately.
    fn terminate(&self, grace: Duration);

    /// Force the run to exit now.
    fn kill(&self);
}

pub trait TransferEngine: Send + Sync {
    /// The exact command a job with these parameters will run.
    fn invocation(&self, source: &std::path::Path, target: &std::path::Path, is_move: bool)
    -> TransferInvocation;

    /// Start a run. Output and exit are reported on `events`.
    fn launch(
        &self,
        req: &TransferRequest,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TransferProcess>>;
}

pub fn create_engine(config: &AppConfig) -> Arc<dyn TransferEngine> {
    match config.transfer_engine {
        TransferEngineType::Rsync => Arc::new(RsyncEngine::new(config.rsync_binary.clone())),
        TransferEngineType::Simulated => Arc::new(SimulatedEngine::default()),
    }
}
