use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::models::{JobId, TransferInvocation};
use crate::core::transfer_engine::{
    ProcessEvent, RunId, TransferEngine, TransferProcess, TransferRequest,
};

const READ_BUFFER: usize = 8 * 1024;

/// Runs the real `rsync` binary.
pub struct RsyncEngine {
    program: String,
}

impl Default for RsyncEngine {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl RsyncEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// `source` with exactly one trailing separator, so rsync copies the contents.
fn source_arg(source: &Path) -> String {
    let raw = source.to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}

impl TransferEngine for RsyncEngine {
    fn invocation(&self, source: &Path, target: &Path, is_move: bool) -> TransferInvocation {
        let mut args: Vec<String> = [
            "-avz",
            "--partial",
            "--progress",
            "--human-readable",
            "--stats",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if is_move {
            args.push("--remove-source-files".to_string());
        }

        args.push(source_arg(source));
        args.push(target.to_string_lossy().into_owned());

        TransferInvocation {
            program: self.program.clone(),
            args,
        }
    }

    fn launch(
        &self,
        req: &TransferRequest,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TransferProcess>> {
        info!(job_id = %req.job_id, run_id = req.run_id, command = %req.invocation, "Spawning rsync");

        let mut child = Command::new(&req.invocation.program)
            .args(&req.invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", req.invocation.program))?;

        let pid = child
            .id()
            .map(|id| Pid::from_raw(id as i32))
            .ok_or_else(|| anyhow!("rsync exited before it could be tracked"))?;

        let stdout = child.stdout.take().context("Failed to get stdout")?;
        let stderr = child.stderr.take().context("Failed to get stderr")?;

        let job_id = req.job_id.clone();
        let run_id = req.run_id;

        let stdout_task = tokio::spawn(forward_output(
            stdout,
            job_id.clone(),
            run_id,
            events.clone(),
            OutputStream::Stdout,
        ));
        let stderr_task = tokio::spawn(forward_output(
            stderr,
            job_id.clone(),
            run_id,
            events.clone(),
            OutputStream::Stderr,
        ));

        let kill = CancellationToken::new();
        let kill_signal = kill.clone();

        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_signal.cancelled() => None,
            };

            let status = match waited {
                Some(status) => status,
                None => {
                    debug!(job_id = %job_id, run_id, "Force killing rsync");
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            // Drain output before reporting exit so the final stats are parsed.
            let _ = stdout_task.await;
            let _ = stderr_task.await;

            let event = match status {
                Ok(status) => {
                    debug!(job_id = %job_id, run_id, status = %status, "rsync exited");
                    ProcessEvent::Exited {
                        job_id,
                        run_id,
                        code: status.code(),
                    }
                }
                Err(e) => ProcessEvent::Failed {
                    job_id,
                    run_id,
                    error: format!("Failed to wait for rsync: {}", e),
                },
            };
            let _ = events.send(event);
        });

        Ok(Box::new(RsyncProcess { pid, kill }))
    }
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Splits a byte stream on `\r` / `\n`, holding back any trailing partial line.
#[derive(Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Append bytes and return every complete segment, delimiters included.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let cut = self.pending.iter().rposition(|b| *b == b'\n' || *b == b'\r')?;
        let complete: Vec<u8> = self.pending.drain(..=cut).collect();
        Some(String::from_utf8_lossy(&complete).into_owned())
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

async fn forward_output<R: AsyncRead + Unpin>(
    mut reader: R,
    job_id: JobId,
    run_id: RunId,
    events: mpsc::UnboundedSender<ProcessEvent>,
    stream: OutputStream,
) {
    let mut framer = LineFramer::default();
    let mut buffer = [0u8; READ_BUFFER];

    let emit = |chunk: String| {
        let event = match stream {
            OutputStream::Stdout => ProcessEvent::Stdout {
                job_id: job_id.clone(),
                run_id,
                chunk,
            },
            OutputStream::Stderr => ProcessEvent::Stderr {
                job_id: job_id.clone(),
                run_id,
                chunk,
            },
        };
        let _ = events.send(event);
    };

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(chunk) = framer.push(&buffer[..n]) {
                    emit(chunk);
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to read rsync output");
                break;
            }
        }
    }

    if let Some(rest) = framer.finish() {
        emit(rest);
    }
}

/// Handle to a live rsync process.
pub struct RsyncProcess {
    pid: Pid,
    kill: CancellationToken,
}

impl TransferProcess for RsyncProcess {
    fn suspend(&self) -> Result<()> {
        signal::kill(self.pid, Signal::SIGSTOP).context("Failed to suspend rsync")
    }

    fn resume(&self) -> Result<()> {
        signal::kill(self.pid, Signal::SIGCONT).context("Failed to resume rsync")
    }

    fn terminate(&self, grace: Duration) {
        if let Err(e) = signal::kill(self.pid, Signal::SIGTERM) {
            debug!(pid = %self.pid, error = %e, "SIGTERM not delivered");
        }
        // A stopped process only acts on SIGTERM once continued.
        let _ = signal::kill(self.pid, Signal::SIGCONT);

        let kill = self.kill.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            kill.cancel();
        });
    }

    fn kill(&self) {
        self.kill.cancel();
    }
}
