use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use syncpilot::core::history::TransferHistory;
use syncpilot::core::models::TransferInvocation;
use syncpilot::core::transfer_engine::{
    ProcessEvent, RunId, TransferEngine, TransferProcess, TransferRequest,
};
use syncpilot::core::{
    JobConfig, JobManager, JobNotification, JobStatus, ManagerError, Notifier, StartOutcome,
};
use tokio::sync::mpsc;

const SAMPLE: &str = "   2506567 100%   42.84MB/s   00:00:00 (xfer#161, to-check=429/724)";

#[derive(Debug, Clone, PartialEq)]
enum Signal {
    Suspend,
    Resume,
    Terminate(Duration),
    Kill,
}

/// Engine that never runs anything. It records each launch and every signal
/// sent to the resulting processes.
#[derive(Clone, Default)]
struct ScriptedEngine {
    launches: Arc<Mutex<Vec<TransferRequest>>>,
    signals: Arc<Mutex<Vec<(String, Signal)>>>,
    refuse_launch: Arc<Mutex<HashSet<String>>>,
    refuse_suspend: Arc<Mutex<bool>>,
    refuse_resume: Arc<Mutex<bool>>,
}

struct ScriptedProcess {
    job_id: String,
    signals: Arc<Mutex<Vec<(String, Signal)>>>,
    refuse_suspend: bool,
    refuse_resume: Arc<Mutex<bool>>,
}

impl ScriptedProcess {
    fn record(&self, signal: Signal) {
        self.signals
            .lock()
            .unwrap()
            .push((self.job_id.clone(), signal));
    }
}

impl TransferProcess for ScriptedProcess {
    fn suspend(&self) -> Result<()> {
        if self.refuse_suspend {
            bail!("no such process");
        }
        self.record(Signal::Suspend);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        if *self.refuse_resume.lock().unwrap() {
            bail!("no such process");
        }
        self.record(Signal::Resume);
        Ok(())
    }

    fn terminate(&self, grace: Duration) {
        self.record(Signal::Terminate(grace));
    }

    fn kill(&self) {
        self.record(Signal::Kill);
    }
}

impl TransferEngine for ScriptedEngine {
    fn invocation(&self, source: &Path, target: &Path, is_move: bool) -> TransferInvocation {
        let mut args = vec!["-avz".to_string()];
        if is_move {
            args.push("--remove-source-files".to_string());
        }
        args.push(format!("{}/", source.display()));
        args.push(target.display().to_string());
        TransferInvocation {
            program: "rsync".to_string(),
            args,
        }
    }

    fn launch(
        &self,
        req: &TransferRequest,
        _events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TransferProcess>> {
        if self.refuse_launch.lock().unwrap().contains(&req.job_id) {
            bail!("Failed to spawn rsync: No such file or directory");
        }
        self.launches.lock().unwrap().push(req.clone());
        Ok(Box::new(ScriptedProcess {
            job_id: req.job_id.clone(),
            signals: self.signals.clone(),
            refuse_suspend: *self.refuse_suspend.lock().unwrap(),
            refuse_resume: self.refuse_resume.clone(),
        }))
    }
}

impl ScriptedEngine {
    fn refuse_launch_of(&self, job_id: &str) {
        self.refuse_launch.lock().unwrap().insert(job_id.to_string());
    }

    fn run_id(&self, job_id: &str) -> RunId {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.job_id == job_id)
            .map(|r| r.run_id)
            .expect("job was never launched")
    }

    fn launch_count(&self, job_id: &str) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .count()
    }

    fn signals_for(&self, job_id: &str) -> Vec<Signal> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

fn manager(max: usize) -> (JobManager, ScriptedEngine, Notifier) {
    let engine = ScriptedEngine::default();
    let notifier = Notifier::new();
    let (manager, _events) = JobManager::new(
        max,
        Arc::new(engine.clone()),
        TransferHistory::in_memory(),
        notifier.clone(),
    );
    (manager, engine, notifier)
}

fn config(name: &str) -> JobConfig {
    JobConfig {
        name: Some(name.to_string()),
        source: PathBuf::from(format!("/src/{}", name)),
        target: PathBuf::from("/dst"),
        is_move: false,
    }
}

fn exited(engine: &ScriptedEngine, id: &str, code: Option<i32>) -> ProcessEvent {
    ProcessEvent::Exited {
        job_id: id.to_string(),
        run_id: engine.run_id(id),
        code,
    }
}

fn stdout(engine: &ScriptedEngine, id: &str, chunk: &str) -> ProcessEvent {
    ProcessEvent::Stdout {
        job_id: id.to_string(),
        run_id: engine.run_id(id),
        chunk: chunk.to_string(),
    }
}

fn status(m: &JobManager, id: &str) -> JobStatus {
    m.get(id).unwrap().status
}

#[test]
fn fourth_job_queues_at_cap_of_three() {
    let (mut m, engine, _) = manager(3);
    let ids: Vec<_> = (0..4).map(|i| m.create(config(&format!("job{}", i)))).collect();

    for id in &ids[..3] {
        assert_eq!(m.start(id), Ok(StartOutcome::Started));
    }
    assert_eq!(m.start(&ids[3]), Ok(StartOutcome::Queued));

    assert_eq!(m.running_count(), 3);
    assert_eq!(status(&m, &ids[3]), JobStatus::Queued);
    assert_eq!(engine.launch_count(&ids[3]), 0);
    assert_eq!(m.queued_ids(), vec![ids[3].clone()]);
}

#[test]
fn stopping_a_job_promotes_the_oldest_queued() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    let c = m.create(config("c"));

    m.start(&a).unwrap();
    m.start(&b).unwrap();
    m.start(&c).unwrap();

    m.stop(&a).unwrap();

    assert_eq!(status(&m, &a), JobStatus::Stopped);
    assert!(m.get(&a).unwrap().ended_at.is_some());
    assert_eq!(status(&m, &b), JobStatus::Running);
    assert_eq!(status(&m, &c), JobStatus::Queued);
    assert_eq!(
        engine.signals_for(&a),
        vec![Signal::Terminate(Duration::from_secs(2))]
    );
}

#[test]
fn stopping_a_queued_job_removes_it_from_the_queue() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    m.start(&a).unwrap();
    m.start(&b).unwrap();

    m.stop(&b).unwrap();
    assert_eq!(status(&m, &b), JobStatus::Stopped);
    assert!(m.queued_ids().is_empty());

    m.handle_process_event(exited(&engine, &a, Some(0)));
    assert_eq!(engine.launch_count(&b), 0);
}

#[test]
fn clean_exit_completes_records_history_and_promotes() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    m.start(&a).unwrap();
    m.start(&b).unwrap();

    m.handle_process_event(stdout(&engine, &a, SAMPLE));
    m.handle_process_event(exited(&engine, &a, Some(0)));

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error, None);
    assert_eq!(job.progress, 41);
    assert_eq!(status(&m, &b), JobStatus::Running);

    let records = m.history().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, a);
    assert_eq!(records[0].file_count, 724);
}

#[test]
fn non_zero_exit_fails_with_code_message() {
    let (mut m, engine, _) = manager(2);
    let a = m.create(config("a"));
    m.start(&a).unwrap();

    m.handle_process_event(exited(&engine, &a, Some(23)));

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("rsync exited with code 23"));
    assert_eq!(m.history().records()[0].status, JobStatus::Failed);
}

#[test]
fn stderr_text_is_kept_as_the_error() {
    let (mut m, engine, _) = manager(2);
    let a = m.create(config("a"));
    m.start(&a).unwrap();

    m.handle_process_event(ProcessEvent::Stderr {
        job_id: a.clone(),
        run_id: engine.run_id(&a),
        chunk: "rsync: mkdir \"/dst\" failed: Permission denied (13)\n".to_string(),
    });
    m.handle_process_event(exited(&engine, &a, Some(11)));

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("rsync: mkdir \"/dst\" failed: Permission denied (13)")
    );
}

#[test]
fn unknown_ids_are_rejected() {
    let (mut m, _, _) = manager(3);
    let missing = ManagerError::NotFound("ghost".to_string());

    assert_eq!(m.start("ghost"), Err(missing.clone()));
    assert_eq!(m.pause("ghost"), Err(missing.clone()));
    assert_eq!(m.resume("ghost"), Err(missing.clone()));
    assert_eq!(m.stop("ghost"), Err(missing.clone()));
    assert_eq!(m.restart("ghost"), Err(missing.clone()));
    assert_eq!(m.remove("ghost"), Err(missing));
}

#[test]
fn invalid_transitions_are_rejected() {
    let (mut m, engine, _) = manager(3);
    let a = m.create(config("a"));

    assert!(matches!(m.pause(&a), Err(ManagerError::InvalidState { .. })));
    assert!(matches!(m.stop(&a), Err(ManagerError::InvalidState { .. })));

    m.start(&a).unwrap();
    assert!(matches!(m.start(&a), Err(ManagerError::InvalidState { .. })));
    assert!(matches!(m.resume(&a), Err(ManagerError::InvalidState { .. })));

    m.handle_process_event(exited(&engine, &a, Some(0)));
    assert!(matches!(
        m.start(&a),
        Err(ManagerError::InvalidState {
            status: JobStatus::Completed,
            ..
        })
    ));
}

#[test]
fn pause_and_resume_signal_the_process_and_keep_the_slot() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    m.start(&a).unwrap();

    m.pause(&a).unwrap();
    assert_eq!(status(&m, &a), JobStatus::Paused);
    assert!(m.get(&a).unwrap().paused_at.is_some());

    // The paused job still holds the only slot.
    assert_eq!(m.start(&b), Ok(StartOutcome::Queued));

    assert_eq!(m.resume(&a), Ok(StartOutcome::Started));
    assert_eq!(status(&m, &a), JobStatus::Running);
    assert!(m.get(&a).unwrap().resumed_at.is_some());
    assert_eq!(engine.signals_for(&a), vec![Signal::Suspend, Signal::Resume]);
    assert_eq!(engine.launch_count(&a), 1);
}

#[test]
fn failed_suspend_still_marks_paused() {
    let (mut m, engine, _) = manager(2);
    *engine.refuse_suspend.lock().unwrap() = true;
    let a = m.create(config("a"));
    m.start(&a).unwrap();

    assert_eq!(m.pause(&a), Ok(()));
    assert_eq!(status(&m, &a), JobStatus::Paused);
}

#[test]
fn events_from_an_abandoned_run_are_ignored() {
    let (mut m, engine, _) = manager(2);
    let a = m.create(config("a"));
    m.start(&a).unwrap();
    let old_run = engine.run_id(&a);

    m.restart(&a).unwrap();
    assert_ne!(engine.run_id(&a), old_run);

    m.handle_process_event(ProcessEvent::Exited {
        job_id: a.clone(),
        run_id: old_run,
        code: Some(1),
    });
    m.handle_process_event(ProcessEvent::Stdout {
        job_id: a.clone(),
        run_id: old_run,
        chunk: SAMPLE.to_string(),
    });

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.progress, 0);
}

#[test]
fn events_after_stop_are_ignored() {
    let (mut m, engine, _) = manager(2);
    let a = m.create(config("a"));
    m.start(&a).unwrap();
    let exit = exited(&engine, &a, None);

    m.stop(&a).unwrap();
    m.handle_process_event(exit);

    assert_eq!(status(&m, &a), JobStatus::Stopped);
    assert!(m.history().records().is_empty());
}

#[test]
fn restart_wipes_progress_and_keeps_identity() {
    let (mut m, engine, _) = manager(2);
    let a = m.create(config("a"));
    m.start(&a).unwrap();
    m.handle_process_event(stdout(&engine, &a, SAMPLE));
    m.handle_process_event(exited(&engine, &a, Some(12)));
    let before = m.get(&a).unwrap().clone();

    assert_eq!(m.restart(&a), Ok(StartOutcome::Started));

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.progress, 0);
    assert_eq!(job.error, None);
    assert_eq!(job.progress_data.file_count.total, 0);
    assert_eq!(job.name, before.name);
    assert_eq!(job.invocation, before.invocation);
    assert_eq!(engine.launch_count(&a), 2);
}

#[test]
fn removing_a_running_job_kills_it_and_frees_the_slot() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    m.start(&a).unwrap();
    m.start(&b).unwrap();

    m.remove(&a).unwrap();

    assert!(m.get(&a).is_none());
    assert_eq!(engine.signals_for(&a), vec![Signal::Kill]);
    assert_eq!(status(&m, &b), JobStatus::Running);
    assert_eq!(m.list().len(), 1);
}

#[test]
fn launch_failure_settles_failed_and_frees_the_slot() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    engine.refuse_launch_of(&a);

    let result = m.start(&a);
    assert!(matches!(result, Err(ManagerError::SpawnFailed { .. })));

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("No such file"));
    assert_eq!(m.active_count(), 0);

    let b = m.create(config("b"));
    assert_eq!(m.start(&b), Ok(StartOutcome::Started));
}

#[test]
fn failed_relaunch_on_restart_promotes_the_queue() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    m.start(&a).unwrap();
    assert_eq!(m.start(&b), Ok(StartOutcome::Queued));

    engine.refuse_launch_of(&a);
    assert!(matches!(m.restart(&a), Err(ManagerError::SpawnFailed { .. })));

    assert_eq!(status(&m, &a), JobStatus::Failed);
    assert_eq!(status(&m, &b), JobStatus::Running);
    assert_eq!(m.active_count(), 1);
}

#[test]
fn failed_relaunch_on_resume_promotes_the_queue() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    let b = m.create(config("b"));
    m.start(&a).unwrap();
    m.start(&b).unwrap();
    m.pause(&a).unwrap();

    *engine.refuse_resume.lock().unwrap() = true;
    engine.refuse_launch_of(&a);
    assert!(matches!(m.resume(&a), Err(ManagerError::SpawnFailed { .. })));

    assert_eq!(status(&m, &a), JobStatus::Failed);
    assert_eq!(status(&m, &b), JobStatus::Running);
}

#[test]
fn resume_relaunches_when_the_process_cannot_continue() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    m.start(&a).unwrap();
    let old_run = engine.run_id(&a);
    m.pause(&a).unwrap();

    *engine.refuse_resume.lock().unwrap() = true;
    assert_eq!(m.resume(&a), Ok(StartOutcome::Started));

    assert_eq!(engine.launch_count(&a), 2);
    assert_ne!(engine.run_id(&a), old_run);
    assert_eq!(status(&m, &a), JobStatus::Running);
    assert_eq!(engine.signals_for(&a), vec![Signal::Suspend, Signal::Kill]);
    assert_eq!(m.active_count(), 1);

    m.handle_process_event(ProcessEvent::Exited {
        job_id: a.clone(),
        run_id: old_run,
        code: Some(0),
    });
    assert_eq!(status(&m, &a), JobStatus::Running);
    assert!(m.history().records().is_empty());
}

#[test]
fn warnings_do_not_stick_to_a_clean_exit() {
    let (mut m, engine, _) = manager(1);
    let a = m.create(config("a"));
    m.start(&a).unwrap();

    m.handle_process_event(ProcessEvent::Stderr {
        job_id: a.clone(),
        run_id: engine.run_id(&a),
        chunk: "rsync: some files vanished before they could be transferred\n".to_string(),
    });
    m.handle_process_event(exited(&engine, &a, Some(0)));

    let job = m.get(&a).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error, None);
}

#[test]
fn move_jobs_carry_the_remove_flag() {
    let (mut m, _, _) = manager(1);
    let id = m.create(JobConfig {
        is_move: true,
        ..config("a")
    });

    let job = m.get(&id).unwrap();
    assert!(job.invocation.args.contains(&"--remove-source-files".to_string()));
    assert_eq!(job.operation.label(), "Move");
}

#[tokio::test]
async fn changes_are_broadcast() {
    let (mut m, engine, notifier) = manager(1);
    let mut rx = notifier.subscribe();

    let a = m.create(config("a"));
    m.start(&a).unwrap();
    m.handle_process_event(stdout(&engine, &a, SAMPLE));
    m.remove(&a).unwrap();

    let mut seen = Vec::new();
    while let Ok(note) = rx.try_recv() {
        seen.push(note);
    }

    assert!(matches!(&seen[0], JobNotification::JobChanged(job) if job.status == JobStatus::Pending));
    assert!(seen.iter().any(|n| matches!(n, JobNotification::JobChanged(job) if job.status == JobStatus::Running)));
    assert!(seen.iter().any(|n| matches!(n, JobNotification::ProgressOutput { chunk, .. } if chunk == SAMPLE)));
    assert!(matches!(seen.last(), Some(JobNotification::JobRemoved { id }) if *id == a));
}
