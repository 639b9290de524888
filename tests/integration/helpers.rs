//! Helper functions for integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use synthetic_monitoring::{
    cache::ResponseCache,
    config::{Config, SocketConfig},
    notify::{
        ChannelRegistry, Dispatcher, NotificationChannel, NotificationMessage, NotifyError,
    },
    orchestrator::Orchestrator,
    probe::Probe,
    request::{
        PingOutcome, RequestExecutor, ResolvedRequest, ResponseEnvelope, TransportFailure,
    },
};

pub fn config(value: Value) -> Config {
    serde_json::from_value(value).unwrap()
}

/// Resolve a configuration holding a single probe.
pub fn single_probe(probe: Value) -> Probe {
    config(serde_json::json!({ "probes": [probe] }))
        .resolve()
        .unwrap()
        .remove(0)
}

pub fn orchestrator(executor: Arc<dyn RequestExecutor>, cache: ResponseCache) -> Orchestrator {
    Orchestrator::new(executor, Arc::new(cache), Dispatcher::empty())
}

/// Notification channel keeping every message it is asked to send.
#[derive(Default)]
pub struct Recording {
    messages: Mutex<Vec<NotificationMessage>>,
}

impl Recording {
    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.messages()
            .iter()
            .map(|message| message.event.name())
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for Recording {
    fn channel_type(&self) -> &str {
        "recording"
    }

    fn validate(&self, _data: &Value) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn send(&self, _data: &Value, message: &NotificationMessage) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Default registry plus the recording channel.
pub fn registry_with(recording: Arc<Recording>) -> ChannelRegistry {
    let mut registry = ChannelRegistry::default();
    registry.register(recording);
    registry
}

/// Executor answering every request with a fixed status, counting calls.
pub struct CountingExecutor {
    calls: AtomicUsize,
    status: Mutex<u16>,
    fail: Mutex<Option<TransportFailure>>,
}

impl CountingExecutor {
    pub fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            status: Mutex::new(status),
            fail: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_failure(&self, failure: Option<TransportFailure>) {
        *self.fail.lock().unwrap() = failure;
    }
}

#[async_trait]
impl RequestExecutor for CountingExecutor {
    async fn execute(&self, _request: &ResolvedRequest) -> ResponseEnvelope {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = *self.fail.lock().unwrap() {
            return ResponseEnvelope::failed(failure, None, 3);
        }

        let status = *self.status.lock().unwrap();
        ResponseEnvelope::answered(status, BTreeMap::new(), br#"{"ok":true}"#, 3)
    }

    async fn ping(&self, _host: &str, _timeout: Duration) -> PingOutcome {
        PingOutcome {
            alive: true,
            response_time_ms: 1,
        }
    }

    async fn socket(&self, _socket: &SocketConfig) -> ResponseEnvelope {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ResponseEnvelope::answered(200, BTreeMap::new(), b"", 1)
    }
}
