//! Probe cycles
//!
//! One cycle executes the steps of a probe in order, evaluates the alerts of
//! every step and then commits all observations to the alert state store in
//! one go. Transitions reported by the threshold state machine are turned into
//! incidents and notifications.
//!
//! ```text
//! template → cache → executor → alerts → (chain done) → thresholds → incidents → dispatcher
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::{self, AlertEvaluation, CompiledAlert};
use crate::cache::ResponseCache;
use crate::monitors::{
    AlertStateStore, Emission, Incident, IncidentLog, MemoryStateStore, ReportingMode,
    ThresholdEvaluation,
};
use crate::notify::{
    AlertDetails, DispatchError, Dispatcher, NotificationEvent, NotificationMessage,
};
use crate::probe::Probe;
use crate::request::template::TemplateEngine;
use crate::request::{RequestExecutor, ResolvedRequest, ResponseEnvelope};

/// The cycle was abandoned before its observations were committed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cycle of probe '{probe_id}' was cancelled")]
pub struct CycleCancelled {
    pub probe_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub url: String,
    pub response: ResponseEnvelope,
    #[serde(skip)]
    pub evaluations: Vec<AlertEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionReport {
    pub alert_id: String,
    pub url: String,
    pub evaluation: ThresholdEvaluation,
    pub emission: Emission,
    pub started_at: DateTime<Utc>,
}

/// Outcome of one cycle, published to observers of the probe actor.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub probe_id: String,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
    pub transitions: Vec<TransitionReport>,

    /// Every step of the chain was executed
    pub completed: bool,
}

impl CycleReport {
    pub fn triggered(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|step| step.evaluations.iter())
            .filter(|evaluation| evaluation.triggered)
            .map(|evaluation| evaluation.alert_id.as_str())
            .collect()
    }
}

/// An alert observation waiting to be committed.
struct Observation<'a> {
    alert: &'a CompiledAlert,
    triggered: bool,

    /// Unresolved step URL, keys the incident
    url: String,
    step: usize,
}

pub struct Orchestrator {
    executor: Arc<dyn RequestExecutor>,
    cache: Arc<ResponseCache>,
    store: Arc<dyn AlertStateStore>,
    incidents: Arc<IncidentLog>,
    dispatcher: RwLock<Arc<Dispatcher>>,
    templates: TemplateEngine,
    mode: ReportingMode,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        cache: Arc<ResponseCache>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            executor,
            cache,
            store: Arc::new(MemoryStateStore::new()),
            incidents: Arc::new(IncidentLog::new()),
            dispatcher: RwLock::new(Arc::new(dispatcher)),
            templates: TemplateEngine::new(),
            mode: ReportingMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ReportingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AlertStateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn mode(&self) -> ReportingMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn AlertStateStore> {
        &self.store
    }

    pub fn incidents(&self) -> &IncidentLog {
        &self.incidents
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the notification channels, e.g. after a reload.
    pub fn replace_dispatcher(&self, dispatcher: Dispatcher) {
        *self
            .dispatcher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(dispatcher);
    }

    /// Register the incident a probe was resumed with.
    pub fn seed(&self, probe: &Probe) {
        if let Some(incident) = probe.resumed_incident() {
            debug!(
                "probe {} resumes with open incident for alert {}",
                probe.id, incident.alert_id
            );
            self.incidents.restore(incident);
        }
    }

    /// Carry buckets and open incidents of probe `from` over to `to`.
    ///
    /// Used when compaction regroups configured probes under a new id. Only
    /// alerts `to` still observes are carried. A down bucket wins over a
    /// healthy one already present.
    pub fn inherit(&self, from: &str, to: &Probe) {
        let alert_ids = to.alert_ids();

        for alert_id in &alert_ids {
            let Some(state) = self.store.get(from, alert_id) else {
                continue;
            };
            match self.store.get(&to.id, alert_id) {
                Some(current) if current.is_down || !state.is_down => {}
                _ => self.store.put(&to.id, alert_id, state),
            }
        }

        for incident in self.incidents.open_for(from) {
            if alert_ids.contains(&incident.alert_id) {
                debug!("incident for alert {} moves from {from} to {}", incident.alert_id, to.id);
                self.incidents.restore(Incident {
                    probe_id: to.id.clone(),
                    ..incident
                });
            }
        }
    }

    /// Drop the state buckets and open incidents of a probe.
    pub fn forget_probe(&self, probe_id: &str) {
        self.store.clear(probe_id);
        self.incidents.clear_probe(probe_id);
    }

    pub async fn notify(&self, message: NotificationMessage) -> Result<(), DispatchError> {
        self.dispatcher().dispatch(&message).await
    }

    /// Execute one cycle of a probe.
    ///
    /// Cancelling `cancel` abandons in-flight requests. A cancelled cycle
    /// commits nothing.
    #[instrument(skip_all, fields(probe = %probe.id))]
    pub async fn run_cycle(
        &self,
        probe: &Probe,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleCancelled> {
        let mut responses: Vec<ResponseEnvelope> = Vec::with_capacity(probe.requests.len());
        let mut steps = Vec::new();
        let mut observations = Vec::new();
        let mut halted = false;

        for (index, step) in probe.requests.iter().enumerate() {
            let request = step.template.resolve(&self.templates, &responses);
            trace!("step {index}: {} {}", request.method.as_str(), request.url);

            let response = self.fetch(probe, index, &request, cancel).await?;
            let evaluations = alerts::evaluate(&response, &step.alerts);

            halted = !response.is_success() || evaluations.iter().any(|e| e.triggered);
            observations.extend(observe(&step.alerts, &evaluations, &step.template.url, index));

            steps.push(StepReport {
                index,
                url: request.url,
                response: response.clone(),
                evaluations,
            });
            responses.push(response);

            if halted {
                debug!("chain stopped after step {index}");
                break;
            }
        }

        if let (Some(socket), false) = (&probe.socket, halted) {
            let index = probe.requests.len();
            let url = socket.url();
            trace!("step {index}: socket {url}");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(probe)),
                response = self.executor.socket(&socket.config) => response,
            };
            let evaluations = alerts::evaluate(&response, &socket.alerts);
            halted = !response.is_success() || evaluations.iter().any(|e| e.triggered);
            observations.extend(observe(&socket.alerts, &evaluations, &url, index));

            steps.push(StepReport {
                index,
                url,
                response,
                evaluations,
            });
        }

        if cancel.is_cancelled() {
            return Err(self.cancelled(probe));
        }

        let transitions = self.commit(probe, &steps, observations).await;

        Ok(CycleReport {
            probe_id: probe.id.clone(),
            finished_at: Utc::now(),
            completed: !halted,
            steps,
            transitions,
        })
    }

    fn cancelled(&self, probe: &Probe) -> CycleCancelled {
        debug!("cycle cancelled");
        CycleCancelled {
            probe_id: probe.id.clone(),
        }
    }

    async fn fetch(
        &self,
        probe: &Probe,
        step: usize,
        request: &ResolvedRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseEnvelope, CycleCancelled> {
        let key = self
            .cache
            .is_enabled()
            .then(|| self.cache.key(request, &probe.id, step));

        if let Some(cached) = key.as_deref().and_then(|key| self.cache.get(key)) {
            trace!("step {step} served from cache");
            return Ok(cached);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled(probe)),
            response = self.executor.execute(request) => response,
        };

        if let Some(key) = key {
            self.cache.put(key, &response);
        }

        Ok(response)
    }

    /// Apply the observations of a finished chain to the state store.
    async fn commit(
        &self,
        probe: &Probe,
        steps: &[StepReport],
        observations: Vec<Observation<'_>>,
    ) -> Vec<TransitionReport> {
        let thresholds = probe.thresholds();
        let mut transitions = Vec::new();

        for observation in observations {
            let alert = observation.alert;
            let previous = self
                .store
                .get(&probe.id, &alert.id)
                .unwrap_or_else(|| probe.initial_state(&alert.id));

            let (next, evaluation) = previous.step(observation.triggered, thresholds);
            self.store.put(&probe.id, &alert.id, next);

            let Some(emission) = self.mode.emission(&previous, observation.triggered, evaluation)
            else {
                continue;
            };

            let Some(step) = steps.iter().find(|step| step.index == observation.step) else {
                continue;
            };

            if let Some(transition) = self
                .transition(probe, alert, &observation.url, step, evaluation, emission)
                .await
            {
                transitions.push(transition);
            }
        }

        transitions
    }

    async fn transition(
        &self,
        probe: &Probe,
        alert: &CompiledAlert,
        url: &str,
        step: &StepReport,
        evaluation: ThresholdEvaluation,
        emission: Emission,
    ) -> Option<TransitionReport> {
        let details = AlertDetails {
            probe_id: probe.id.clone(),
            probe_name: probe.name.clone(),
            url: step.url.clone(),
            alert_id: alert.id.clone(),
            alert_query: alert.query.clone(),
            status: step.response.status,
            response_time_ms: step.response.response_time_ms,
        };
        let rendered = alert.render_message(&self.templates, &step.response);

        let (event, summary, started_at) = match emission {
            Emission::Incident | Emission::ResumedIncident => {
                let incident = match emission {
                    Emission::Incident => self.incidents.open(&probe.id, &alert.id, url),
                    _ => Some(self.incidents.open_or_existing(&probe.id, &alert.id, url)),
                };
                let Some(incident) = incident else {
                    warn!("incident for alert {} is already open", alert.id);
                    return None;
                };

                info!("incident: {} ({})", probe.name, alert.query);
                let started_at = incident.created_at;
                (
                    NotificationEvent::Incident {
                        alert: details,
                        started_at,
                    },
                    format!("{} is down: {rendered}", probe.name),
                    started_at,
                )
            }
            Emission::Recovery => {
                let incident = self.incidents.recover(&probe.id, &alert.id, url);
                let recovered_at = incident
                    .as_ref()
                    .and_then(|incident| incident.recovered_at)
                    .unwrap_or_else(Utc::now);
                let started_at = incident.map_or(recovered_at, |incident| incident.created_at);

                info!("recovery: {} ({})", probe.name, alert.query);
                (
                    NotificationEvent::Recovery {
                        alert: details,
                        started_at,
                        recovered_at,
                    },
                    format!("{} recovered: {rendered}", probe.name),
                    started_at,
                )
            }
        };

        if let Err(e) = self.notify(NotificationMessage::new(event, summary)).await {
            error!("notification for alert {} incomplete: {e}", alert.id);
        }

        Some(TransitionReport {
            alert_id: alert.id.clone(),
            url: url.to_string(),
            evaluation,
            emission,
            started_at,
        })
    }
}

fn observe<'a>(
    alerts: &'a [CompiledAlert],
    evaluations: &[AlertEvaluation],
    url: &str,
    step: usize,
) -> Vec<Observation<'a>> {
    evaluations
        .iter()
        .filter_map(|evaluation| {
            let alert = alerts.iter().find(|alert| alert.id == evaluation.alert_id)?;
            Some(Observation {
                alert,
                triggered: evaluation.triggered,
                url: url.to_string(),
                step,
            })
        })
        .collect()
}
