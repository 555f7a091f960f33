//! The task that owns the [`JobManager`].
//!
//! API calls arrive as [`Command`]s with a oneshot reply, process events on
//! the manager's own channel. Both are handled one at a time in a single
//! `select!` loop, so the registry never needs a lock. Slow work (folder
//! analysis) runs in `spawn_blocking` on the caller's side of the handle.

use std::path::{Path, PathBuf};

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use super::analyzer::{self, FolderAnalysis};
use super::heuristic::Heuristic;
use super::history::{HistoryRecord, TransferPrediction};
use super::manager::{JobManager, ManagerError, StartOutcome};
use super::models::{Job, JobConfig, JobId, Operation};
use super::naming;
use super::notifications::{JobNotification, Notifier};
use super::optimizer::{self, Recommendation};
use super::transfer_engine::ProcessEvent;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Create {
        config: JobConfig,
        reply: Reply<Job>,
    },
    Start {
        id: JobId,
        reply: Reply<Result<StartOutcome, ManagerError>>,
    },
    Pause {
        id: JobId,
        reply: Reply<Result<(), ManagerError>>,
    },
    Resume {
        id: JobId,
        reply: Reply<Result<StartOutcome, ManagerError>>,
    },
    Stop {
        id: JobId,
        reply: Reply<Result<(), ManagerError>>,
    },
    Restart {
        id: JobId,
        reply: Reply<Result<StartOutcome, ManagerError>>,
    },
    Remove {
        id: JobId,
        reply: Reply<Result<(), ManagerError>>,
    },
    List {
        reply: Reply<Vec<Job>>,
    },
    Get {
        id: JobId,
        reply: Reply<Option<Job>>,
    },
    Status {
        reply: Reply<ManagerStatus>,
    },
    RecentHistory {
        limit: usize,
        reply: Reply<Vec<HistoryRecord>>,
    },
    SimilarHistory {
        source: PathBuf,
        target: PathBuf,
        reply: Reply<Vec<HistoryRecord>>,
    },
    Predict {
        file_count: u64,
        reply: Reply<Option<TransferPrediction>>,
    },
}

/// Counts reported by `daemon.status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub total_jobs: usize,
    pub running: usize,
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

/// Output of `optimizer.recommend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAdvice {
    pub source: Heuristic<FolderAnalysis>,
    pub target: Heuristic<FolderAnalysis>,
    pub recommendations: Vec<Recommendation>,
    pub prediction: Option<TransferPrediction>,
}

pub struct Orchestrator {
    manager: JobManager,
    events_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    commands_rx: mpsc::Receiver<Command>,
}

impl Orchestrator {
    /// Wrap a manager and hand back the handle that drives it. Nothing happens
    /// until [`Orchestrator::run`] is awaited (usually via `tokio::spawn`).
    pub fn new(
        manager: JobManager,
        events_rx: mpsc::UnboundedReceiver<ProcessEvent>,
        notifier: Notifier,
    ) -> (Self, ManagerHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let orchestrator = Self {
            manager,
            events_rx,
            commands_rx,
        };
        let handle = ManagerHandle {
            commands: commands_tx,
            notifier,
        };
        (orchestrator, handle)
    }

    /// Runs until every [`ManagerHandle`] is dropped. Live transfers are
    /// killed when the manager is dropped on the way out.
    pub async fn run(mut self) {
        info!(
            max_concurrent = self.manager.max_concurrent(),
            "Job orchestrator started"
        );

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.manager.handle_process_event(event);
                }
            }
        }

        info!("Job orchestrator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let m = &mut self.manager;
        // A dropped reply only means the caller stopped waiting.
        match command {
            Command::Create { config, reply } => {
                let id = m.create(config);
                if let Some(job) = m.get(&id) {
                    let _ = reply.send(job.clone());
                }
            }
            Command::Start { id, reply } => {
                let _ = reply.send(m.start(&id));
            }
            Command::Pause { id, reply } => {
                let _ = reply.send(m.pause(&id));
            }
            Command::Resume { id, reply } => {
                let _ = reply.send(m.resume(&id));
            }
            Command::Stop { id, reply } => {
                let _ = reply.send(m.stop(&id));
            }
            Command::Restart { id, reply } => {
                let _ = reply.send(m.restart(&id));
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(m.remove(&id));
            }
            Command::List { reply } => {
                let _ = reply.send(m.list());
            }
            Command::Get { id, reply } => {
                let _ = reply.send(m.get(&id).cloned());
            }
            Command::Status { reply } => {
                let _ = reply.send(ManagerStatus {
                    total_jobs: m.list().len(),
                    running: m.running_count(),
                    active: m.active_count(),
                    queued: m.queued_ids().len(),
                    max_concurrent: m.max_concurrent(),
                });
            }
            Command::RecentHistory { limit, reply } => {
                let _ = reply.send(m.history().recent(limit));
            }
            Command::SimilarHistory {
                source,
                target,
                reply,
            } => {
                let _ = reply.send(m.history().similar(&source, &target));
            }
            Command::Predict { file_count, reply } => {
                let _ = reply.send(m.history().predict(file_count));
            }
        }
    }
}

/// Cloneable front door to the orchestrator task.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
    notifier: Notifier,
}

impl ManagerHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ManagerError::Unavailable)?;
        rx.await.map_err(|_| ManagerError::Unavailable)
    }

    /// Register a job. When no name is given, the folders are analyzed on the
    /// blocking pool first so the orchestrator loop never touches the disk.
    pub async fn create_job(&self, mut config: JobConfig) -> Result<Job, ManagerError> {
        if config.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            let source = config.source.clone();
            let target = config.target.clone();
            let operation = Operation::from_move_flag(config.is_move);
            let fallback = naming::fallback_name(&source, operation, Local::now());

            let name = tokio::task::spawn_blocking(move || {
                naming::suggest_name(&source, &target, operation, Local::now()).into_inner()
            })
            .await
            .unwrap_or(fallback);
            config.name = Some(name);
        }

        self.request(|reply| Command::Create { config, reply }).await
    }

    pub async fn start(&self, id: &str) -> Result<StartOutcome, ManagerError> {
        let id = id.to_string();
        self.request(|reply| Command::Start { id, reply }).await?
    }

    pub async fn pause(&self, id: &str) -> Result<(), ManagerError> {
        let id = id.to_string();
        self.request(|reply| Command::Pause { id, reply }).await?
    }

    pub async fn resume(&self, id: &str) -> Result<StartOutcome, ManagerError> {
        let id = id.to_string();
        self.request(|reply| Command::Resume { id, reply }).await?
    }

    pub async fn stop(&self, id: &str) -> Result<(), ManagerError> {
        let id = id.to_string();
        self.request(|reply| Command::Stop { id, reply }).await?
    }

    pub async fn restart(&self, id: &str) -> Result<StartOutcome, ManagerError> {
        let id = id.to_string();
        self.request(|reply| Command::Restart { id, reply }).await?
    }

    pub async fn remove(&self, id: &str) -> Result<(), ManagerError> {
        let id = id.to_string();
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    pub async fn list(&self) -> Result<Vec<Job>, ManagerError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn get(&self, id: &str) -> Result<Job, ManagerError> {
        let key = id.to_string();
        self.request(|reply| Command::Get { id: key, reply })
            .await?
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    pub async fn status(&self) -> Result<ManagerStatus, ManagerError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>, ManagerError> {
        self.request(|reply| Command::RecentHistory { limit, reply })
            .await
    }

    pub async fn similar_history(
        &self,
        source: &Path,
        target: &Path,
    ) -> Result<Vec<HistoryRecord>, ManagerError> {
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        self.request(|reply| Command::SimilarHistory {
            source,
            target,
            reply,
        })
        .await
    }

    pub async fn predict(&self, file_count: u64) -> Result<Option<TransferPrediction>, ManagerError> {
        self.request(|reply| Command::Predict { file_count, reply })
            .await
    }

    /// Analyze both folders and combine them with similar past transfers.
    pub async fn recommend(
        &self,
        source: &Path,
        target: &Path,
    ) -> Result<TransferAdvice, ManagerError> {
        let (src_path, dst_path) = (source.to_path_buf(), target.to_path_buf());
        let (source_analysis, target_analysis) = tokio::task::spawn_blocking(move || {
            (analyzer::analyze(&src_path), analyzer::analyze(&dst_path))
        })
        .await
        .map_err(|e| {
            debug!(error = %e, "Folder analysis task failed");
            ManagerError::Unavailable
        })?;

        let history = self.similar_history(source, target).await?;
        let recommendations = optimizer::recommend(
            source_analysis.value(),
            target_analysis.value(),
            &history,
            Local::now().hour(),
        );

        let prediction = if source_analysis.is_fallback() {
            None
        } else {
            self.predict(source_analysis.value().file_count).await?
        };

        Ok(TransferAdvice {
            source: source_analysis,
            target: target_analysis,
            recommendations,
            prediction,
        })
    }

    /// Every job change from now on. See [`Notifier`].
    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.notifier.subscribe()
    }
}
