use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::core::codec;
use crate::core::models::TransferInvocation;
use crate::core::transfer_engine::{
    ProcessEvent, TransferEngine, TransferProcess, TransferRequest,
};

/// Emits rsync-shaped output without touching the filesystem.
pub struct SimulatedEngine {
    pub file_count: u64,
    pub file_size: u64,
    pub speed_mb_per_sec: u64,
    pub tick: Duration,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self {
            file_count: 40,
            file_size: 8 * 1024 * 1024,
            speed_mb_per_sec: 100,
            tick: Duration::from_millis(250),
        }
    }
}

impl TransferEngine for SimulatedEngine {
    fn invocation(&self, source: &Path, target: &Path, is_move: bool) -> TransferInvocation {
        let mut args = vec!["--files".to_string(), self.file_count.to_string()];
        if is_move {
            args.push("--move".to_string());
        }
        args.push(source.to_string_lossy().into_owned());
        args.push(target.to_string_lossy().into_owned());

        TransferInvocation {
            program: "simulated".to_string(),
            args,
        }
    }

    fn launch(
        &self,
        req: &TransferRequest,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Box<dyn TransferProcess>> {
        if self.file_count == 0 {
            bail!("Simulated engine has nothing to transfer");
        }

        let job_id = req.job_id.clone();
        let run_id = req.run_id;
        let total = self.file_count;
        let file_size = self.file_size;
        let speed = codec::format_speed((self.speed_mb_per_sec * 1024 * 1024) as f64);
        let tick = self.tick;

        let cancel = CancellationToken::new();
        let (pause_tx, mut pause_rx) = watch::channel(false);
        let stop = cancel.clone();

        tokio::spawn(async move {
            let send = |chunk: String| {
                let _ = events.send(ProcessEvent::Stdout {
                    job_id: job_id.clone(),
                    run_id,
                    chunk,
                });
            };

            send("sending incremental file list\n".to_string());

            for n in 1..=total {
                while *pause_rx.borrow() {
                    tokio::select! {
                        changed = pause_rx.changed() => if changed.is_err() { break },
                        _ = stop.cancelled() => break,
                    }
                }

                tokio::select! {
                    _ = sleep(tick) => {}
                    _ = stop.cancelled() => {
                        let _ = events.send(ProcessEvent::Exited { job_id: job_id.clone(), run_id, code: None });
                        return;
                    }
                }

                send(format!(
                    "file_{:04}.dat\n{:>12} 100% {:>10} 0:00:00 (xfer#{}, to-check={}/{})\n",
                    n,
                    file_size,
                    speed,
                    n,
                    total - n,
                    total
                ));
            }

            send(format!(
                "\nsent {} bytes  received {} bytes\ntotal size is {}  speedup is 1.00\n",
                file_size * total,
                total * 35,
                codec::format_bytes(file_size * total)
            ));
            let _ = events.send(ProcessEvent::Exited {
                job_id,
                run_id,
                code: Some(0),
            });
        });

        Ok(Box::new(SimulatedProcess { cancel, pause_tx }))
    }
}

pub struct SimulatedProcess {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
}

impl TransferProcess for SimulatedProcess {
    fn suspend(&self) -> Result<()> {
        self.pause_tx.send_replace(true);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.pause_tx.send_replace(false);
        Ok(())
    }

    fn terminate(&self, _grace: Duration) {
        self.cancel.cancel();
    }

    fn kill(&self) {
        self.cancel.cancel();
    }
}
