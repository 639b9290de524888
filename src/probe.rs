//! Executable probes
//!
//! A [`Probe`] is the resolved form of a (possibly compacted) probe
//! configuration: templates are validated, alerts are compiled and attached
//! to the steps they observe.

use std::time::Duration;

use tracing::warn;

use crate::alerts::{CompiledAlert, default_alerts};
use crate::compactor::CompactedProbe;
use crate::config::{AlertConfig, ConfigError, LastEvent, SocketConfig};
use crate::monitors::{AlertState, Incident, Thresholds};
use crate::request::template::{RequestTemplate, TemplateEngine};

#[derive(Debug, Clone, PartialEq)]
pub struct RequestStep {
    pub template: RequestTemplate,
    pub alerts: Vec<CompiledAlert>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketStep {
    pub config: SocketConfig,
    pub alerts: Vec<CompiledAlert>,
}

impl SocketStep {
    pub fn url(&self) -> String {
        format!("tcp://{}:{}", self.config.host, self.config.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub id: String,
    pub name: String,
    pub interval: Duration,
    pub requests: Vec<RequestStep>,
    pub socket: Option<SocketStep>,
    pub incident_threshold: usize,
    pub recovery_threshold: usize,
    pub last_event: Option<LastEvent>,

    /// Configured probes executed by this one
    pub source_ids: Vec<String>,
}

impl Probe {
    /// Compile a probe configuration.
    pub fn resolve(compacted: CompactedProbe) -> Result<Probe, ConfigError> {
        let CompactedProbe { config, source_ids } = compacted;
        let probe_id = config.id.clone();

        let has_alerts = !config.alerts.is_empty()
            || config.requests.iter().any(|request| !request.alerts.is_empty());
        let probe_alerts = if has_alerts {
            config.alerts.clone()
        } else {
            default_alerts()
        };

        let step_count = config.requests.len() + usize::from(config.socket.is_some());
        let suffix = |index: usize| (step_count > 1).then(|| format!("#{index}"));

        let requests = config
            .requests
            .iter()
            .enumerate()
            .map(|(index, request)| -> Result<RequestStep, ConfigError> {
                let template = RequestTemplate::compile(request).map_err(|(field, reason)| {
                    ConfigError::InvalidTemplate {
                        probe: probe_id.clone(),
                        field,
                        reason,
                    }
                })?;

                let mut alerts = compile_alerts(&probe_id, &probe_alerts, suffix(index))?;
                alerts.extend(compile_alerts(&probe_id, &request.alerts, suffix(index))?);

                Ok(RequestStep {
                    template,
                    alerts: dedup_by_id(alerts),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let socket = config
            .socket
            .clone()
            .map(|socket| {
                let alerts =
                    compile_alerts(&probe_id, &probe_alerts, suffix(config.requests.len()))?;
                Ok::<_, ConfigError>(SocketStep {
                    config: socket,
                    alerts: dedup_by_id(alerts),
                })
            })
            .transpose()?;

        Ok(Probe {
            name: config.name.clone().unwrap_or_else(|| probe_id.clone()),
            id: probe_id,
            interval: Duration::from_secs(config.interval),
            requests,
            socket,
            incident_threshold: config.incident_threshold,
            recovery_threshold: config.recovery_threshold,
            last_event: config.last_event,
            source_ids,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.incident_threshold, self.recovery_threshold)
    }

    /// Starting state of an alert bucket, resumed from the last known event.
    pub fn initial_state(&self, alert_id: &str) -> AlertState {
        match self.resumed_alert() {
            Some((resumed, _)) if resumed == alert_id => AlertState::seeded_down(),
            _ => AlertState::default(),
        }
    }

    /// The open incident described by the last known event, if any.
    pub fn resumed_incident(&self) -> Option<Incident> {
        let event = self.last_event.as_ref()?;
        let (alert_id, url) = self.resumed_alert()?;

        Some(Incident {
            probe_id: self.id.clone(),
            alert_id,
            url,
            created_at: event.created_at,
            recovered_at: None,
        })
    }

    /// Bucket id and step URL of the unrecovered last event.
    ///
    /// The event may name the alert without its `#<step>` suffix, in which
    /// case the first step carrying that alert is resumed.
    fn resumed_alert(&self) -> Option<(String, String)> {
        let event = self.last_event.as_ref().filter(|event| event.recovered_at.is_none())?;

        let steps = self
            .requests
            .iter()
            .map(|step| (&step.alerts, step.template.url.clone()))
            .chain(self.socket.iter().map(|step| (&step.alerts, step.url())));

        let mut unsuffixed = None;
        for (alerts, url) in steps {
            for alert in alerts {
                if alert.id == event.alert_id {
                    return Some((alert.id.clone(), url));
                }
                if unsuffixed.is_none() && step_base(&alert.id) == Some(event.alert_id.as_str()) {
                    unsuffixed = Some((alert.id.clone(), url.clone()));
                }
            }
        }
        unsuffixed
    }

    /// Ids of every alert bucket of this probe.
    pub fn alert_ids(&self) -> Vec<String> {
        self.requests
            .iter()
            .flat_map(|step| step.alerts.iter())
            .chain(self.socket.iter().flat_map(|step| step.alerts.iter()))
            .map(|alert| alert.id.clone())
            .collect()
    }

    /// The first URL probed, for display.
    pub fn target(&self) -> String {
        self.requests
            .first()
            .map(|step| step.template.url.clone())
            .or_else(|| self.socket.as_ref().map(SocketStep::url))
            .unwrap_or_default()
    }
}

fn compile_alerts(
    probe_id: &str,
    configs: &[AlertConfig],
    id_suffix: Option<String>,
) -> Result<Vec<CompiledAlert>, ConfigError> {
    let mut alerts = Vec::with_capacity(configs.len());

    for config in configs {
        let invalid = |reason: String| ConfigError::InvalidAlert {
            probe: probe_id.to_string(),
            alert: config.query_text().to_string(),
            reason,
        };

        let Some(mut alert) = CompiledAlert::compile(config).map_err(invalid)? else {
            warn!("probe {probe_id}: skipping unrecognised alert '{}'", config.query_text());
            continue;
        };

        if let Some(message) = &alert.message {
            TemplateEngine::validate(message).map_err(|reason| ConfigError::InvalidTemplate {
                probe: probe_id.to_string(),
                field: format!("message of alert '{}'", alert.id),
                reason,
            })?;
        }

        if let Some(suffix) = &id_suffix {
            alert.id.push_str(suffix);
        }
        alerts.push(alert);
    }

    Ok(alerts)
}

/// `status-not-2xx` for `status-not-2xx#1`.
fn step_base(alert_id: &str) -> Option<&str> {
    let (base, index) = alert_id.rsplit_once('#')?;
    index.parse::<usize>().is_ok().then_some(base)
}

fn dedup_by_id(alerts: Vec<CompiledAlert>) -> Vec<CompiledAlert> {
    let mut unique: Vec<CompiledAlert> = Vec::with_capacity(alerts.len());
    for alert in alerts {
        if !unique.iter().any(|known| known.id == alert.id) {
            unique.push(alert);
        }
    }
    unique
}
