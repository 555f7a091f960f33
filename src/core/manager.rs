//! Job registry, concurrency cap and lifecycle state machine.
//!
//! ```text
//! pending ──start──► running ──exit 0──► completed
//!    │                 │  ▲   ──exit≠0─► failed
//!    └─cap full─► queued  │  │
//!                  │   pause resume
//!                  │      ▼  │
//!                  └────► paused
//! running | paused | queued ──stop──► stopped
//! any ──restart──► pending ──► start
//! ```
//!
//! `JobManager` is plain synchronous state. Every mutation happens through
//! `&mut self`, so whoever owns it (the [`Orchestrator`](super::Orchestrator)
//! task) serializes API calls and process events. Paused jobs keep their
//! concurrency slot because their process is still alive.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::classifier;
use super::history::TransferHistory;
use super::models::{Job, JobConfig, JobId, JobStatus, Operation};
use super::naming;
use super::notifications::{JobNotification, Notifier};
use super::progress::{self, ProgressSnapshot};
use super::transfer_engine::{ProcessEvent, RunId, TransferEngine, TransferProcess, TransferRequest};
use crate::logging::LogThrottle;

/// Time a stopped process gets to exit before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ManagerError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("cannot {operation} job {id} while it is {status}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        operation: String,
    },
    #[error("failed to start job {id}: {reason}")]
    SpawnFailed { id: JobId, reason: String },
    #[error("job manager is not running")]
    Unavailable,
}

/// What `start` (and anything that falls through to it) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOutcome {
    Started,
    Queued,
}

/// Runtime-only state for a job with a live process.
struct JobRuntime {
    run_id: RunId,
    process: Box<dyn TransferProcess>,
}

pub struct JobManager {
    jobs: HashMap<JobId, Job>,
    runtimes: HashMap<JobId, JobRuntime>,
    /// Jobs holding a concurrency slot (running or paused).
    active: HashSet<JobId>,
    /// Waiting jobs, oldest first.
    queue: VecDeque<JobId>,
    max_concurrent: usize,
    engine: Arc<dyn TransferEngine>,
    history: TransferHistory,
    notifier: Notifier,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    next_run_id: RunId,
    progress_log: LogThrottle,
}

impl JobManager {
    /// Build a manager. The returned receiver carries process events that must
    /// be fed back through [`JobManager::handle_process_event`].
    pub fn new(
        max_concurrent: usize,
        engine: Arc<dyn TransferEngine>,
        history: TransferHistory,
        notifier: Notifier,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            jobs: HashMap::new(),
            runtimes: HashMap::new(),
            active: HashSet::new(),
            queue: VecDeque::new(),
            max_concurrent: max_concurrent.max(1),
            engine,
            history,
            notifier,
            events_tx,
            next_run_id: 0,
            progress_log: LogThrottle::new(PROGRESS_LOG_INTERVAL),
        };
        (manager, events_rx)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_ids(&self) -> Vec<JobId> {
        self.queue.iter().cloned().collect()
    }

    pub fn history(&self) -> &TransferHistory {
        &self.history
    }

    fn publish_job(&self, id: &str) {
        if let Some(job) = self.jobs.get(id) {
            self.notifier.publish(JobNotification::JobChanged(job.clone()));
        }
    }

    fn job_mut(&mut self, id: &str) -> Result<&mut Job, ManagerError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    fn invalid(job: &Job, operation: &str) -> ManagerError {
        ManagerError::InvalidState {
            id: job.id.clone(),
            status: job.status,
            operation: operation.to_string(),
        }
    }

    /// Register a new pending job and return its id. Without a name, one is
    /// derived from the folders (see [`naming::suggest_name`]).
    pub fn create(&mut self, config: JobConfig) -> JobId {
        let id = Uuid::now_v7().to_string();
        let operation = Operation::from_move_flag(config.is_move);

        let name = match config.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => name,
            None => naming::suggest_name(&config.source, &config.target, operation, Local::now())
                .into_inner(),
        };

        let invocation = self
            .engine
            .invocation(&config.source, &config.target, config.is_move);

        let job = Job {
            id: id.clone(),
            name,
            source: config.source,
            target: config.target,
            is_move: config.is_move,
            operation,
            status: JobStatus::Pending,
            progress: 0,
            progress_data: ProgressSnapshot::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            paused_at: None,
            resumed_at: None,
            error: None,
            invocation,
        };

        info!(job_id = %id, name = %job.name, "Job created");
        self.jobs.insert(id.clone(), job);
        self.publish_job(&id);
        id
    }

    /// Start a job now, or queue it when every slot is taken.
    pub fn start(&mut self, id: &str) -> Result<StartOutcome, ManagerError> {
        let holds_slot = self.active.contains(id);
        let has_process = self.runtimes.contains_key(id);
        let job = self.job_mut(id)?;

        match job.status {
            JobStatus::Pending | JobStatus::Queued => {}
            JobStatus::Paused if !has_process => {}
            _ => return Err(Self::invalid(job, "start")),
        }

        if !holds_slot && self.active.len() >= self.max_concurrent {
            let job = self.job_mut(id)?;
            if job.status != JobStatus::Queued {
                job.status = JobStatus::Queued;
                self.queue.push_back(id.to_string());
                info!(job_id = %id, "Concurrency limit reached, job queued");
                self.publish_job(id);
            }
            return Ok(StartOutcome::Queued);
        }

        self.queue.retain(|q| q != id);
        self.active.insert(id.to_string());

        self.next_run_id += 1;
        let run_id = self.next_run_id;

        let job = self.job_mut(id)?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.ended_at = None;
        job.error = None;

        let request = TransferRequest {
            job_id: job.id.clone(),
            run_id,
            source: job.source.clone(),
            target: job.target.clone(),
            is_move: job.is_move,
            invocation: job.invocation.clone(),
        };

        match self.engine.launch(&request, self.events_tx.clone()) {
            Ok(process) => {
                info!(job_id = %id, run_id, "Job started");
                self.runtimes
                    .insert(id.to_string(), JobRuntime { run_id, process });
                self.publish_job(id);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(job_id = %id, error = %reason, "Failed to launch transfer");
                self.report_error(id, &reason);
                self.settle(id, JobStatus::Failed, Some(reason.clone()));
                Err(ManagerError::SpawnFailed {
                    id: id.to_string(),
                    reason,
                })
            }
        }
    }

    pub fn pause(&mut self, id: &str) -> Result<(), ManagerError> {
        let job = self.job_mut(id)?;
        if job.status != JobStatus::Running {
            return Err(Self::invalid(job, "pause"));
        }

        match self.runtimes.get(id) {
            Some(runtime) => {
                if let Err(e) = runtime.process.suspend() {
                    warn!(job_id = %id, error = %e, "Could not suspend transfer, marking paused anyway");
                }
            }
            None => warn!(job_id = %id, "No live process to suspend, marking paused anyway"),
        }

        let job = self.job_mut(id)?;
        job.status = JobStatus::Paused;
        job.paused_at = Some(Utc::now());
        info!(job_id = %id, "Job paused");
        self.publish_job(id);
        Ok(())
    }

    /// Continue a paused job. If its process is gone the transfer is started
    /// again; rsync resumes partial files, but progress restarts from its view.
    pub fn resume(&mut self, id: &str) -> Result<StartOutcome, ManagerError> {
        let job = self.job_mut(id)?;
        if job.status != JobStatus::Paused {
            return Err(Self::invalid(job, "resume"));
        }

        let continued = match self.runtimes.get(id) {
            Some(runtime) => match runtime.process.resume() {
                Ok(()) => true,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Could not continue transfer, restarting it");
                    false
                }
            },
            None => false,
        };

        if !continued {
            if let Some(runtime) = self.runtimes.remove(id) {
                runtime.process.kill();
            }
            return self.start_and_refill(id);
        }

        let job = self.job_mut(id)?;
        job.status = JobStatus::Running;
        job.resumed_at = Some(Utc::now());
        info!(job_id = %id, "Job resumed");
        self.publish_job(id);
        Ok(StartOutcome::Started)
    }

    /// Stop a running, paused or queued job. The process gets
    /// [`STOP_GRACE_PERIOD`] to exit before it is killed; the job is marked
    /// stopped without waiting.
    pub fn stop(&mut self, id: &str) -> Result<(), ManagerError> {
        let job = self.job_mut(id)?;
        if !matches!(
            job.status,
            JobStatus::Running | JobStatus::Paused | JobStatus::Queued
        ) {
            return Err(Self::invalid(job, "stop"));
        }

        if let Some(runtime) = self.runtimes.remove(id) {
            runtime.process.terminate(STOP_GRACE_PERIOD);
        }

        info!(job_id = %id, "Job stopped");
        self.settle(id, JobStatus::Stopped, None);
        self.promote_next_queued();
        Ok(())
    }

    /// Kill any live run, wipe progress and timestamps, and start again.
    pub fn restart(&mut self, id: &str) -> Result<StartOutcome, ManagerError> {
        if !self.jobs.contains_key(id) {
            return Err(ManagerError::NotFound(id.to_string()));
        }

        if let Some(runtime) = self.runtimes.remove(id) {
            runtime.process.kill();
        }
        self.active.remove(id);
        self.queue.retain(|q| q != id);
        self.progress_log.forget(id);

        let job = self.job_mut(id)?;
        job.reset();
        info!(job_id = %id, "Job reset for restart");
        self.publish_job(id);

        self.start_and_refill(id)
    }

    /// `start` for a job whose slot may just have been released. A failed
    /// launch frees the slot, so the queue gets a turn.
    fn start_and_refill(&mut self, id: &str) -> Result<StartOutcome, ManagerError> {
        let result = self.start(id);
        if result.is_err() {
            self.promote_next_queued();
        }
        result
    }

    /// Kill any live run and drop the job entirely.
    pub fn remove(&mut self, id: &str) -> Result<(), ManagerError> {
        if !self.jobs.contains_key(id) {
            return Err(ManagerError::NotFound(id.to_string()));
        }

        if let Some(runtime) = self.runtimes.remove(id) {
            runtime.process.kill();
        }
        self.active.remove(id);
        self.queue.retain(|q| q != id);
        self.progress_log.forget(id);
        self.jobs.remove(id);

        info!(job_id = %id, "Job removed");
        self.notifier.publish(JobNotification::JobRemoved { id: id.to_string() });
        self.promote_next_queued();
        Ok(())
    }

    /// Fill free slots from the queue, oldest first. A job that fails to
    /// launch gives its slot straight to the next one.
    pub fn promote_next_queued(&mut self) {
        while self.active.len() < self.max_concurrent {
            let Some(id) = self.queue.pop_front() else {
                break;
            };

            match self.start(&id) {
                Ok(StartOutcome::Started) => debug!(job_id = %id, "Promoted queued job"),
                Ok(StartOutcome::Queued) => {
                    self.queue.push_front(id);
                    break;
                }
                Err(e) => debug!(job_id = %id, error = %e, "Queued job did not start"),
            }
        }
    }

    fn is_current_run(&self, job_id: &str, run_id: RunId) -> bool {
        self.runtimes
            .get(job_id)
            .is_some_and(|rt| rt.run_id == run_id)
    }

    /// React to output or exit from a run. Events from abandoned runs are
    /// dropped.
    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        if !self.is_current_run(event.job_id(), event.run_id()) {
            debug!(job_id = %event.job_id(), run_id = event.run_id(), "Ignoring event from stale run");
            return;
        }

        match event {
            ProcessEvent::Stdout { job_id, chunk, .. } => self.handle_output(&job_id, chunk),
            ProcessEvent::Stderr { job_id, chunk, .. } => {
                let text = chunk.trim();
                if text.is_empty() {
                    return;
                }
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.error = Some(text.to_string());
                }
                self.report_error(&job_id, text);
                self.publish_job(&job_id);
            }
            ProcessEvent::Exited { job_id, code, .. } => {
                self.runtimes.remove(&job_id);
                if code == Some(0) {
                    info!(job_id = %job_id, "Transfer completed");
                    self.settle(&job_id, JobStatus::Completed, None);
                } else {
                    let reason = match code {
                        Some(code) => format!("rsync exited with code {}", code),
                        None => "rsync was terminated by a signal".to_string(),
                    };
                    warn!(job_id = %job_id, reason = %reason, "Transfer failed");
                    self.settle(&job_id, JobStatus::Failed, Some(reason));
                }
                self.promote_next_queued();
            }
            ProcessEvent::Failed { job_id, error, .. } => {
                self.runtimes.remove(&job_id);
                warn!(job_id = %job_id, error = %error, "Transfer process error");
                self.report_error(&job_id, &error);
                self.settle(&job_id, JobStatus::Failed, Some(error));
                self.promote_next_queued();
            }
        }
    }

    fn handle_output(&mut self, job_id: &str, chunk: String) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return;
        };

        let outcome = progress::apply_chunk(&mut job.progress_data, &chunk, Utc::now());
        job.progress = job.progress_data.percentage;

        if outcome.progress_updated && self.progress_log.should_log(job_id) {
            debug!(
                job_id = %job_id,
                percentage = job.progress,
                speed = %job.progress_data.current_speed,
                files = job.progress_data.file_count.current,
                total_files = job.progress_data.file_count.total,
                "Transfer progress"
            );
        }

        self.notifier.publish(JobNotification::ProgressOutput {
            id: job_id.to_string(),
            chunk,
        });

        if outcome.progress_updated || outcome.file_changed {
            self.publish_job(job_id);
        }
    }

    fn report_error(&self, job_id: &str, text: &str) {
        self.notifier.publish(JobNotification::JobError {
            id: job_id.to_string(),
            error: text.to_string(),
            classified: classifier::classify(text),
        });
    }

    /// Move a job into a final status, release its slot and record history for
    /// completed or failed runs. `fallback_error` only fills an empty error.
    fn settle(&mut self, id: &str, status: JobStatus, fallback_error: Option<String>) {
        self.active.remove(id);
        self.queue.retain(|q| q != id);
        self.progress_log.forget(id);

        let Some(job) = self.jobs.get_mut(id) else {
            return;
        };
        job.status = status;
        job.ended_at = Some(Utc::now());
        if status == JobStatus::Completed {
            // Warnings on stderr do not outlive a clean exit.
            job.error = None;
        } else if job.error.is_none() {
            job.error = fallback_error;
        }

        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            self.history.record_transfer(job);
        }
        self.publish_job(id);
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        for (id, runtime) in self.runtimes.drain() {
            debug!(job_id = %id, "Killing transfer on shutdown");
            runtime.process.kill();
        }
    }
}
