//! Per-(probe, alert) state buckets

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::threshold::AlertState;

/// Storage for alert state buckets.
///
/// Buckets of different probes are disjoint; callers are expected to apply
/// updates of one probe in order (a probe's cycles never overlap).
pub trait AlertStateStore: Send + Sync {
    fn get(&self, probe_id: &str, alert_id: &str) -> Option<AlertState>;

    fn put(&self, probe_id: &str, alert_id: &str, state: AlertState);

    /// Remove every bucket of a probe.
    fn clear(&self, probe_id: &str);

    fn probe_ids(&self) -> Vec<String>;
}

/// In-memory store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    buckets: Mutex<HashMap<String, HashMap<String, AlertState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertStateStore for MemoryStateStore {
    fn get(&self, probe_id: &str, alert_id: &str) -> Option<AlertState> {
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets.get(probe_id)?.get(alert_id).copied()
    }

    fn put(&self, probe_id: &str, alert_id: &str, state: AlertState) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets
            .entry(probe_id.to_string())
            .or_default()
            .insert(alert_id.to_string(), state);
    }

    fn clear(&self, probe_id: &str) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets.remove(probe_id);
    }

    fn probe_ids(&self) -> Vec<String> {
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = buckets.keys().cloned().collect();
        ids.sort();
        ids
    }
}
