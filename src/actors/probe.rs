//! ProbeActor - runs the cycles of one probe
//!
//! ```text
//! Timer tick → Orchestrator::run_cycle → Publish CycleReport → [supervisor, tests, ...]
//!     ↑
//!     └─── Commands (CheckNow, UpdateInterval, Shutdown) and the cancellation token
//! ```
//!
//! Cycles of one probe never overlap: the loop awaits each cycle before it
//! looks at the timer or the command channel again.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::orchestrator::{CycleCancelled, CycleReport, Orchestrator};
use crate::probe::Probe;

use super::messages::ProbeCommand;

pub struct ProbeActor {
    probe: Probe,
    orchestrator: Arc<Orchestrator>,
    command_rx: mpsc::Receiver<ProbeCommand>,
    event_tx: broadcast::Sender<CycleReport>,
    cancel: CancellationToken,
    interval_duration: Duration,
}

fn new_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl ProbeActor {
    pub fn new(
        probe: Probe,
        orchestrator: Arc<Orchestrator>,
        command_rx: mpsc::Receiver<ProbeCommand>,
        event_tx: broadcast::Sender<CycleReport>,
        cancel: CancellationToken,
    ) -> Self {
        let interval_duration = probe.interval;

        Self {
            probe,
            orchestrator,
            command_rx,
            event_tx,
            cancel,
            interval_duration,
        }
    }

    /// Run until shut down, cancelled, or the command channel is closed.
    #[instrument(skip(self), fields(probe = %self.probe.id))]
    pub async fn run(mut self) {
        debug!("starting probe actor");

        let mut ticker = new_ticker(Instant::now(), self.interval_duration);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("probe actor cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    let _ = self.perform_cycle().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ProbeCommand::CheckNow { respond_to } => {
                            debug!("received CheckNow command");
                            let result = self.perform_cycle().await;
                            let _ = respond_to.send(result);
                        }

                        ProbeCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = new_ticker(
                                Instant::now() + self.interval_duration,
                                self.interval_duration,
                            );
                        }

                        ProbeCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("probe actor stopped");
    }

    async fn perform_cycle(&self) -> Result<CycleReport, CycleCancelled> {
        let result = self.orchestrator.run_cycle(&self.probe, &self.cancel).await;

        if let Ok(report) = &result {
            // no subscribers is fine
            if self.event_tx.send(report.clone()).is_err() {
                trace!("no subscribers for cycle report");
            }
        }

        result
    }
}

/// Handle for controlling a ProbeActor
pub struct ProbeHandle {
    sender: mpsc::Sender<ProbeCommand>,
    probe_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Spawn a probe actor whose cycles are cancelled together with `cancel`.
    pub fn spawn(
        probe: Probe,
        orchestrator: Arc<Orchestrator>,
        event_tx: broadcast::Sender<CycleReport>,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let probe_id = probe.id.clone();

        let actor = ProbeActor::new(probe, orchestrator, cmd_rx, event_tx, cancel.clone());
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            probe_id,
            cancel,
            task,
        }
    }

    /// Run a cycle right away and wait for its report.
    pub async fn check_now(&self) -> Result<Result<CycleReport, CycleCancelled>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProbeCommand::CheckNow { respond_to: tx })
            .await?;

        Ok(rx.await?)
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(ProbeCommand::UpdateInterval { interval_secs })
            .await?;
        Ok(())
    }

    /// Let the current cycle finish, then stop.
    pub async fn shutdown(self) {
        let _ = self.sender.send(ProbeCommand::Shutdown).await;
        let _ = self.task.await;
    }

    /// Abandon the current cycle and wait for the actor to exit.
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    pub fn probe_id(&self) -> &str {
        &self.probe_id
    }
}
