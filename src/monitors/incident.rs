//! Open and closed unhealthy periods
//!
//! At most one incident is open per (probe, alert, url).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Incident {
    pub probe_id: String,
    pub alert_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Time between creation and recovery, or until now while open.
    pub fn duration(&self) -> chrono::Duration {
        self.recovered_at.unwrap_or_else(Utc::now) - self.created_at
    }

    pub fn is_open(&self) -> bool {
        self.recovered_at.is_none()
    }
}

type IncidentKey = (String, String, String);

fn key(probe_id: &str, alert_id: &str, url: &str) -> IncidentKey {
    (probe_id.to_string(), alert_id.to_string(), url.to_string())
}

#[derive(Debug, Default)]
pub struct IncidentLog {
    open: Mutex<HashMap<IncidentKey, Incident>>,
}

impl IncidentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an incident. Returns `None` when one is already open for the tuple.
    pub fn open(&self, probe_id: &str, alert_id: &str, url: &str) -> Option<Incident> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let key = key(probe_id, alert_id, url);
        if open.contains_key(&key) {
            return None;
        }

        let incident = Incident {
            probe_id: probe_id.to_string(),
            alert_id: alert_id.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
            recovered_at: None,
        };
        open.insert(key, incident.clone());
        Some(incident)
    }

    /// The open incident for the tuple, opening one if needed.
    pub fn open_or_existing(&self, probe_id: &str, alert_id: &str, url: &str) -> Incident {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.entry(key(probe_id, alert_id, url))
            .or_insert_with(|| Incident {
                probe_id: probe_id.to_string(),
                alert_id: alert_id.to_string(),
                url: url.to_string(),
                created_at: Utc::now(),
                recovered_at: None,
            })
            .clone()
    }

    /// Re-open an incident known from a previous run, keeping its start time.
    pub fn restore(&self, incident: Incident) {
        if !incident.is_open() {
            return;
        }
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.entry(key(&incident.probe_id, &incident.alert_id, &incident.url))
            .or_insert(incident);
    }

    /// Close the open incident for the tuple and return it.
    pub fn recover(&self, probe_id: &str, alert_id: &str, url: &str) -> Option<Incident> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let mut incident = open.remove(&key(probe_id, alert_id, url))?;
        incident.recovered_at = Some(Utc::now());
        Some(incident)
    }

    pub fn open_incidents(&self) -> Vec<Incident> {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let mut incidents: Vec<Incident> = open.values().cloned().collect();
        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        incidents
    }

    /// Open incidents of one probe.
    pub fn open_for(&self, probe_id: &str) -> Vec<Incident> {
        self.open_incidents()
            .into_iter()
            .filter(|incident| incident.probe_id == probe_id)
            .collect()
    }

    /// Drop every open incident of a probe.
    pub fn clear_probe(&self, probe_id: &str) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.retain(|(probe, _, _), _| probe != probe_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_open_incident_per_tuple() {
        let log = IncidentLog::new();

        assert!(log.open("p", "a", "https://x").is_some());
        assert!(log.open("p", "a", "https://x").is_none());
        assert!(log.open("p", "a", "https://y").is_some());
        assert_eq!(log.open_incidents().len(), 2);
    }

    #[test]
    fn test_recover_closes_incident() {
        let log = IncidentLog::new();
        let opened = log.open("p", "a", "https://x").unwrap();

        let closed = log.recover("p", "a", "https://x").unwrap();

        assert_eq!(closed.created_at, opened.created_at);
        assert!(closed.recovered_at.is_some());
        assert!(closed.duration() >= chrono::Duration::zero());
        assert!(log.recover("p", "a", "https://x").is_none());
        assert!(log.open("p", "a", "https://x").is_some());
    }

    #[test]
    fn test_restore_keeps_start_time() {
        let log = IncidentLog::new();
        let created_at = Utc::now() - chrono::Duration::hours(2);
        log.restore(Incident {
            probe_id: "p".into(),
            alert_id: "a".into(),
            url: "https://x".into(),
            created_at,
            recovered_at: None,
        });

        assert_eq!(log.open_or_existing("p", "a", "https://x").created_at, created_at);
        assert!(log.open("p", "a", "https://x").is_none());
    }

    #[test]
    fn test_clear_probe() {
        let log = IncidentLog::new();
        log.open("p", "a", "u");
        log.open("q", "a", "u");

        assert_eq!(log.open_for("p").len(), 1);
        log.clear_probe("p");

        assert!(log.open_for("p").is_empty());
        let open = log.open_incidents();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].probe_id, "q");
    }
}
