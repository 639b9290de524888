use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::compactor;
use crate::probe::Probe;

/// Errors detected while validating or resolving a configuration.
///
/// All of these are fatal at startup. On reload they are reported and the
/// previous configuration stays active.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("probe id must not be empty")]
    EmptyProbeId,

    #[error("duplicate probe id '{0}'")]
    DuplicateProbeId(String),

    #[error("probe '{0}' has neither requests nor a socket check")]
    MissingCheck(String),

    #[error("probe '{probe}': {field} must be at least 1")]
    InvalidNumber { probe: String, field: &'static str },

    #[error("probe '{probe}': invalid alert '{alert}': {reason}")]
    InvalidAlert {
        probe: String,
        alert: String,
        reason: String,
    },

    #[error("probe '{probe}': invalid template in {field}: {reason}")]
    InvalidTemplate {
        probe: String,
        field: String,
        reason: String,
    },

    #[error("unknown notification channel type '{channel_type}' (id: {id})")]
    UnknownChannel { id: String, channel_type: String },

    #[error("invalid notification channel '{id}': {reason}")]
    InvalidChannel { id: String, reason: String },
}

/// Parsed agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,

    #[serde(default)]
    pub notifications: Vec<ChannelConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Report the first observation of a probe resumed in the unhealthy state
    #[serde(default)]
    pub symon_mode: bool,

    /// Seconds between status update notifications (disabled when absent)
    pub status_notification_interval: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,

    /// Polling interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub requests: Vec<RequestConfig>,

    pub socket: Option<SocketConfig>,

    #[serde(default)]
    pub alerts: Vec<AlertConfig>,

    #[serde(default = "default_threshold")]
    pub incident_threshold: usize,

    #[serde(default = "default_threshold")]
    pub recovery_threshold: usize,

    pub last_event: Option<LastEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub method: HttpMethod,

    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Object or string body, may contain chaining templates
    pub body: Option<serde_json::Value>,

    /// Timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Send an ICMP echo to the URL host instead of an HTTP request
    #[serde(default)]
    pub ping: bool,

    #[serde(default)]
    pub allow_unauthorized: bool,

    #[serde(default)]
    pub alerts: Vec<AlertConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,

    /// Payload written after connecting
    pub data: Option<String>,

    /// Timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// An alert definition as written in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertConfig {
    /// Built-in names such as `status-not-2xx` or `response-time-greater-than-200-ms`
    Named(String),

    /// Triggered while `query` is truthy
    Query {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Triggered while `assertion` is falsy
    Assertion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        assertion: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl AlertConfig {
    pub fn explicit_id(&self) -> Option<&str> {
        match self {
            AlertConfig::Named(_) => None,
            AlertConfig::Query { id, .. } | AlertConfig::Assertion { id, .. } => id.as_deref(),
        }
    }

    /// The same definition with its id removed, used for structural comparison.
    pub fn without_id(&self) -> AlertConfig {
        match self.clone() {
            AlertConfig::Named(name) => AlertConfig::Named(name),
            AlertConfig::Query { query, message, .. } => AlertConfig::Query {
                id: None,
                query,
                message,
            },
            AlertConfig::Assertion {
                assertion, message, ..
            } => AlertConfig::Assertion {
                id: None,
                assertion,
                message,
            },
        }
    }

    /// Explicit id, or a digest of the definition so it stays stable across reloads.
    pub fn id(&self) -> String {
        if let Some(id) = self.explicit_id() {
            return id.to_string();
        }
        if let AlertConfig::Named(name) = self {
            return name.clone();
        }

        let canonical = serde_json::to_vec(&self.without_id()).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..6])
    }

    /// Expression or name shown in notifications.
    pub fn query_text(&self) -> &str {
        match self {
            AlertConfig::Named(name) => name,
            AlertConfig::Query { query, .. } => query,
            AlertConfig::Assertion { assertion, .. } => assertion,
        }
    }
}

/// Snapshot of the last known incident of a probe, used to resume state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastEvent {
    pub alert_id: String,
    pub created_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
}

/// Opaque notification channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,

    #[serde(rename = "type")]
    pub channel_type: String,

    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKeyScope {
    /// Identical resolved requests share an entry regardless of their probe
    #[default]
    Resolved,

    /// Entries are additionally keyed by probe id and step index
    PerProbe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time to live in seconds, zero disables the cache
    #[serde(default = "crate::util::get_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub key_scope: CacheKeyScope,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: crate::util::get_cache_ttl(),
            key_scope: CacheKeyScope::default(),
        }
    }
}

fn default_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    10_000
}

fn default_threshold() -> usize {
    5
}

impl Config {
    /// Check the configuration for errors that must abort startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut by_id: HashMap<&str, Vec<&ProbeConfig>> = HashMap::new();

        for probe in &self.probes {
            if probe.id.trim().is_empty() {
                return Err(ConfigError::EmptyProbeId);
            }
            if probe.requests.is_empty() && probe.socket.is_none() {
                return Err(ConfigError::MissingCheck(probe.id.clone()));
            }
            for (field, value) in [
                ("interval", probe.interval as usize),
                ("incident_threshold", probe.incident_threshold),
                ("recovery_threshold", probe.recovery_threshold),
            ] {
                if value == 0 {
                    return Err(ConfigError::InvalidNumber {
                        probe: probe.id.clone(),
                        field,
                    });
                }
            }

            by_id.entry(probe.id.as_str()).or_default().push(probe);
        }

        // duplicates are only tolerated when compaction folds them into one probe
        for (id, probes) in by_id {
            let [first, rest @ ..] = probes.as_slice() else {
                continue;
            };
            if !rest.iter().all(|other| compactor::is_identical(first, other)) {
                return Err(ConfigError::DuplicateProbeId(id.to_string()));
            }
        }

        Ok(())
    }

    /// Validate, compact and compile the probes into their executable form.
    pub fn resolve(&self) -> Result<Vec<Probe>, ConfigError> {
        self.validate()?;

        compactor::compact(&self.probes)
            .into_iter()
            .map(Probe::resolve)
            .collect()
    }
}

/// Read a JSON (or YAML, by extension) configuration file.
pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));

    let config: Config = if is_yaml {
        serde_yaml::from_str(&file_content)
            .with_context(|| format!("invalid configuration file {}", path.display()))?
    } else {
        serde_json::from_str(&file_content)
            .with_context(|| format!("invalid configuration file {}", path.display()))?
    };

    trace!("loaded config: {config:?}");
    Ok(config)
}
