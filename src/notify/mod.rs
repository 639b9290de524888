//! Notifications
//!
//! Transitions of the alert state machine, as well as agent lifecycle events,
//! are turned into a [`NotificationMessage`] and fanned out to every
//! configured channel by the [`Dispatcher`](dispatcher::Dispatcher).

pub mod discord;
pub mod dispatcher;
pub mod registry;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::util::{AGENT_VERSION, get_hostname};

pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::ChannelRegistry;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} answered with status {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
}

/// The alert a transition is about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDetails {
    pub probe_id: String,
    pub probe_name: String,
    pub url: String,
    pub alert_id: String,
    pub alert_query: String,

    /// Status (or transport failure code) of the response that caused the transition
    pub status: u16,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationEvent {
    Incident {
        #[serde(flatten)]
        alert: AlertDetails,
        started_at: DateTime<Utc>,
    },
    Recovery {
        #[serde(flatten)]
        alert: AlertDetails,
        started_at: DateTime<Utc>,
        recovered_at: DateTime<Utc>,
    },
    Start {
        probe_count: usize,
    },
    Termination {
        probe_count: usize,
    },
    StatusUpdate {
        probe_count: usize,
        open_incidents: usize,
    },
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationEvent::Incident { .. } => "incident",
            NotificationEvent::Recovery { .. } => "recovery",
            NotificationEvent::Start { .. } => "start",
            NotificationEvent::Termination { .. } => "termination",
            NotificationEvent::StatusUpdate { .. } => "status-update",
        }
    }

    pub fn alert(&self) -> Option<&AlertDetails> {
        match self {
            NotificationEvent::Incident { alert, .. } | NotificationEvent::Recovery { alert, .. } => {
                Some(alert)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageMeta {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub agent_version: String,
}

impl MessageMeta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            hostname: get_hostname(),
            agent_version: AGENT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    pub event: NotificationEvent,

    /// Human readable one-liner
    pub summary: String,
    pub meta: MessageMeta,
}

impl NotificationMessage {
    pub fn new(event: NotificationEvent, summary: impl ToString) -> Self {
        Self {
            event,
            summary: summary.to_string(),
            meta: MessageMeta::now(),
        }
    }

    /// Lifecycle message with a default summary.
    pub fn lifecycle(event: NotificationEvent) -> Self {
        let summary = match &event {
            NotificationEvent::Start { probe_count } => {
                format!("Monitoring started with {probe_count} probe(s)")
            }
            NotificationEvent::Termination { probe_count } => {
                format!("Monitoring stopped ({probe_count} probe(s))")
            }
            NotificationEvent::StatusUpdate {
                probe_count,
                open_incidents,
            } => format!("{probe_count} probe(s) running, {open_incidents} open incident(s)"),
            NotificationEvent::Incident { alert, .. } => {
                format!("{} is down: {}", alert.probe_name, alert.alert_query)
            }
            NotificationEvent::Recovery { alert, .. } => {
                format!("{} recovered: {}", alert.probe_name, alert.alert_query)
            }
        };
        Self::new(event, summary)
    }
}

/// A kind of notification target, e.g. a Discord webhook.
///
/// Channel data is the opaque `data` object of a channel configuration.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Type name used in the configuration, e.g. `"discord"`.
    fn channel_type(&self) -> &str;

    fn validate(&self, data: &Value) -> Result<(), NotifyError>;

    async fn send(&self, data: &Value, message: &NotificationMessage) -> Result<(), NotifyError>;
}

/// Read a required URL from channel data.
pub(crate) fn required_url(data: &Value) -> Result<String, NotifyError> {
    let url = data
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| NotifyError::InvalidConfig("missing 'url'".to_string()))?;

    reqwest::Url::parse(url)
        .map_err(|e| NotifyError::InvalidConfig(format!("invalid url '{url}': {e}")))?;

    Ok(url.to_string())
}
