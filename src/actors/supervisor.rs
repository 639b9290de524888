//! Supervisor - owns the running probe set
//!
//! The supervisor spawns one [`ProbeActor`](super::probe::ProbeActor) per
//! resolved probe, restarts the changed ones on reload and sends the lifecycle
//! notifications (start, status update, termination).

use std::collections::{HashMap, HashSet};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, Interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, ConfigError};
use crate::notify::{ChannelRegistry, DispatchError, Dispatcher, NotificationEvent, NotificationMessage};
use crate::orchestrator::{CycleCancelled, CycleReport, Orchestrator};
use crate::probe::Probe;

use super::messages::{ProbeSummary, ReloadSummary, SupervisorCommand};
use super::probe::ProbeHandle;

pub struct Supervisor {
    orchestrator: Arc<Orchestrator>,
    registry: ChannelRegistry,
    probes: Vec<Probe>,
    handles: Vec<ProbeHandle>,
    command_rx: mpsc::Receiver<SupervisorCommand>,
    event_tx: broadcast::Sender<CycleReport>,
    cancel: CancellationToken,
    status_interval: Option<Duration>,
}

fn status_ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| interval_at(Instant::now() + period, period))
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

impl Supervisor {
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting supervisor");

        self.spawn_probes();
        self.notify_lifecycle(NotificationEvent::Start {
            probe_count: self.probes.len(),
        })
        .await;

        let mut ticker = status_ticker(self.status_interval);

        loop {
            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    if let Err(e) = self.status_update().await {
                        error!("status update incomplete: {e}");
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        self.drain_probes().await;
                        break;
                    };

                    match cmd {
                        SupervisorCommand::Reload { config, respond_to } => {
                            let result = self.reload(*config).await;
                            if let Err(e) = &result {
                                error!("configuration rejected, keeping the current one: {e}");
                            }
                            ticker = status_ticker(self.status_interval);
                            let _ = respond_to.send(result);
                        }

                        SupervisorCommand::CheckNow { probe_id, respond_to } => {
                            let _ = respond_to.send(self.check_now(&probe_id).await);
                        }

                        SupervisorCommand::Probes { respond_to } => {
                            let _ = respond_to.send(self.probes.iter().map(ProbeSummary::from).collect());
                        }

                        SupervisorCommand::StatusUpdate { respond_to } => {
                            let _ = respond_to.send(self.status_update().await);
                        }

                        SupervisorCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            self.stop_probes().await;
                            self.notify_lifecycle(NotificationEvent::Termination {
                                probe_count: self.probes.len(),
                            })
                            .await;
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }
            }
        }

        debug!("supervisor stopped");
    }

    fn spawn_probes(&mut self) {
        self.handles = self.probes.iter().map(|probe| self.spawn(probe)).collect();
        info!("running {} probe(s)", self.handles.len());
    }

    fn spawn(&self, probe: &Probe) -> ProbeHandle {
        ProbeHandle::spawn(
            probe.clone(),
            self.orchestrator.clone(),
            self.event_tx.clone(),
            self.cancel.child_token(),
        )
    }

    /// Abandon in-flight cycles and wait for every actor to exit.
    async fn stop_probes(&mut self) {
        for handle in self.handles.drain(..) {
            handle.cancel().await;
        }
    }

    /// Let in-flight cycles finish, then wait for every actor to exit.
    async fn drain_probes(&mut self) {
        for handle in self.handles.drain(..) {
            handle.shutdown().await;
        }
    }

    async fn check_now(&self, probe_id: &str) -> Option<Result<CycleReport, CycleCancelled>> {
        let handle = self.handles.iter().find(|handle| handle.probe_id() == probe_id)?;

        match handle.check_now().await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("probe {probe_id} did not answer: {e:#}");
                None
            }
        }
    }

    /// Swap in a new configuration.
    ///
    /// Actors of probes whose definition is unchanged keep running, an
    /// interval change is applied in place. Every other actor is stopped
    /// before any state is touched. Buckets and incidents of ids present
    /// before and after survive, a new id inherits them from the probes
    /// sharing its source ids, and those of removed ids are dropped.
    #[instrument(skip_all)]
    async fn reload(&mut self, config: Config) -> Result<ReloadSummary, ConfigError> {
        let probes = config.resolve()?;
        let dispatcher = Dispatcher::new(&self.registry, &config.notifications)?;

        let mut running: HashMap<String, ProbeHandle> = self
            .handles
            .drain(..)
            .map(|handle| (handle.probe_id().to_string(), handle))
            .collect();
        let mut handles = Vec::with_capacity(probes.len());
        let mut respawn = Vec::new();

        for probe in &probes {
            let reusable = self
                .probes
                .iter()
                .find(|old| old.id == probe.id)
                .filter(|old| same_but_interval(old, probe));

            match (running.remove(&probe.id), reusable) {
                (Some(handle), Some(old)) if old.interval == probe.interval => handles.push(handle),
                (Some(handle), Some(_)) => {
                    match handle.update_interval(probe.interval.as_secs()).await {
                        Ok(()) => handles.push(handle),
                        Err(e) => {
                            warn!("probe {} did not take the new interval: {e:#}", probe.id);
                            handle.cancel().await;
                            respawn.push(probe);
                        }
                    }
                }
                (Some(handle), None) => {
                    handle.cancel().await;
                    respawn.push(probe);
                }
                (None, _) => respawn.push(probe),
            }
        }
        for handle in running.into_values() {
            handle.cancel().await;
        }

        let old_ids: HashSet<&str> = self.probes.iter().map(|probe| probe.id.as_str()).collect();
        let new_ids: HashSet<&str> = probes.iter().map(|probe| probe.id.as_str()).collect();

        let mut summary = ReloadSummary::default();
        for probe in &probes {
            if old_ids.contains(probe.id.as_str()) {
                summary.kept.push(probe.id.clone());
                continue;
            }

            let predecessors: Vec<&Probe> = self
                .probes
                .iter()
                .filter(|old| old.source_ids.iter().any(|id| probe.source_ids.contains(id)))
                .collect();
            if predecessors.is_empty() {
                summary.added.push(probe.id.clone());
            } else {
                for old in predecessors {
                    debug!("probe {} takes over the state of {}", probe.id, old.id);
                    self.orchestrator.inherit(&old.id, probe);
                }
                summary.regrouped.push(probe.id.clone());
            }
            self.orchestrator.seed(probe);
        }
        for probe in &self.probes {
            if !new_ids.contains(probe.id.as_str()) {
                self.orchestrator.forget_probe(&probe.id);
                summary.removed.push(probe.id.clone());
            }
        }

        self.orchestrator.replace_dispatcher(dispatcher);
        for probe in respawn {
            handles.push(self.spawn(probe));
        }
        self.handles = handles;
        self.probes = probes;
        self.status_interval = config.status_notification_interval.map(Duration::from_secs);

        info!(
            "configuration reloaded: {} kept, {} added, {} regrouped, {} removed",
            summary.kept.len(),
            summary.added.len(),
            summary.regrouped.len(),
            summary.removed.len()
        );
        Ok(summary)
    }

    async fn status_update(&self) -> Result<(), DispatchError> {
        let event = NotificationEvent::StatusUpdate {
            probe_count: self.probes.len(),
            open_incidents: self.orchestrator.incidents().open_incidents().len(),
        };
        self.orchestrator
            .notify(NotificationMessage::lifecycle(event))
            .await
    }

    async fn notify_lifecycle(&self, event: NotificationEvent) {
        let name = event.name();
        if let Err(e) = self.orchestrator.notify(NotificationMessage::lifecycle(event)).await {
            error!("{name} notification incomplete: {e}");
        }
    }
}

fn same_but_interval(old: &Probe, new: &Probe) -> bool {
    Probe {
        interval: new.interval,
        ..old.clone()
    } == *new
}

/// Handle for controlling the Supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
    event_tx: broadcast::Sender<CycleReport>,
}

impl SupervisorHandle {
    /// Resolve a configuration and start monitoring it.
    ///
    /// Configuration errors are returned before anything is spawned.
    pub fn spawn(
        config: &Config,
        orchestrator: Arc<Orchestrator>,
        registry: ChannelRegistry,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let probes = config.resolve()?;
        orchestrator.replace_dispatcher(Dispatcher::new(&registry, &config.notifications)?);
        for probe in &probes {
            orchestrator.seed(probe);
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(256);

        let supervisor = Supervisor {
            orchestrator,
            registry,
            probes,
            handles: Vec::new(),
            command_rx: cmd_rx,
            event_tx: event_tx.clone(),
            cancel,
            status_interval: config.status_notification_interval.map(Duration::from_secs),
        };
        tokio::spawn(supervisor.run());

        Ok(Self {
            sender: cmd_tx,
            event_tx,
        })
    }

    /// Reports of every cycle of every probe.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.event_tx.subscribe()
    }

    pub async fn reload(&self, config: Config) -> Result<ReloadSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Reload {
                config: Box::new(config),
                respond_to: tx,
            })
            .await?;

        Ok(rx.await??)
    }

    /// Run one cycle of a probe now. `None` when the probe is unknown.
    pub async fn check_now(&self, probe_id: &str) -> Result<Option<CycleReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::CheckNow {
                probe_id: probe_id.to_string(),
                respond_to: tx,
            })
            .await?;

        rx.await?.transpose().map_err(Into::into)
    }

    pub async fn probes(&self) -> Result<Vec<ProbeSummary>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Probes { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn status_update(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::StatusUpdate { respond_to: tx })
            .await?;
        Ok(rx.await??)
    }

    /// Stop every probe and wait for the termination notification to go out.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Shutdown { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }
}
