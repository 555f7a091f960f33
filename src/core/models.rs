use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::ProgressSnapshot;

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Move,
}

impl Operation {
    pub fn from_move_flag(is_move: bool) -> Self {
        if is_move { Self::Move } else { Self::Copy }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Copy => "Copy",
            Self::Move => "Move",
        }
    }
}

/// What a caller asks for when creating a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub is_move: bool,
}

/// The exact command line a job runs, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for TransferInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Serializable job record. Live process handles are kept by the manager,
/// never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub is_move: bool,
    pub operation: Operation,
    pub status: JobStatus,
    pub progress: u8,
    pub progress_data: ProgressSnapshot,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub invocation: TransferInvocation,
}

impl Job {
    /// Reset everything a run produces, keeping identity and invocation.
    pub fn reset(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.progress_data = ProgressSnapshot::default();
        self.started_at = None;
        self.ended_at = None;
        self.paused_at = None;
        self.resumed_at = None;
        self.error = None;
    }

    /// Elapsed run time in milliseconds, when both ends are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
