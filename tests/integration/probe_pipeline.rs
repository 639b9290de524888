//! Supervisor → probe actor → orchestrator → dispatcher

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use synthetic_monitoring::actors::SupervisorHandle;
use synthetic_monitoring::cache::ResponseCache;
use synthetic_monitoring::monitors::{Emission, ReportingMode};
use synthetic_monitoring::notify::NotificationEvent;
use synthetic_monitoring::orchestrator::Orchestrator;
use tokio_util::sync::CancellationToken;

use crate::helpers::{CountingExecutor, Recording, config, orchestrator, registry_with};

fn monitored(probe: Value) -> Value {
    json!({
        "probes": [probe],
        "notifications": [{ "id": "rec", "type": "recording" }]
    })
}

fn spawn(
    orchestrator: Orchestrator,
    recording: &Arc<Recording>,
    config_value: Value,
) -> SupervisorHandle {
    SupervisorHandle::spawn(
        &config(config_value),
        Arc::new(orchestrator),
        registry_with(recording.clone()),
        CancellationToken::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_incident_and_recovery_are_notified_once() {
    let executor = CountingExecutor::new(500);
    let recording = Arc::new(Recording::default());
    let handle = spawn(
        orchestrator(executor.clone(), ResponseCache::disabled()),
        &recording,
        monitored(json!({
            "id": "web",
            "interval": 3600,
            "alerts": ["status-not-2xx"],
            "incident_threshold": 3,
            "recovery_threshold": 2,
            "requests": [{ "url": "https://example.com" }]
        })),
    );
    let mut events = handle.subscribe();

    // first cycle runs on the first tick
    let first = events.recv().await.unwrap();
    assert!(first.transitions.is_empty());

    let second = handle.check_now("web").await.unwrap().unwrap();
    assert!(second.transitions.is_empty());

    let third = handle.check_now("web").await.unwrap().unwrap();
    assert_eq!(third.transitions.len(), 1);
    assert_eq!(third.transitions[0].emission, Emission::Incident);

    // still down, nothing new
    handle.check_now("web").await.unwrap().unwrap();
    assert_eq!(recording.event_names(), vec!["start", "incident"]);

    handle.status_update().await.unwrap();

    executor.set_status(200);
    let recovering = handle.check_now("web").await.unwrap().unwrap();
    assert!(recovering.transitions.is_empty());
    let recovered = handle.check_now("web").await.unwrap().unwrap();
    assert_eq!(recovered.transitions[0].emission, Emission::Recovery);

    handle.shutdown().await.unwrap();

    assert_eq!(
        recording.event_names(),
        vec!["start", "incident", "status-update", "recovery", "termination"]
    );

    let messages = recording.messages();
    assert_eq!(messages[1].summary, "web is down: status-not-2xx");
    assert!(matches!(
        messages[2].event,
        NotificationEvent::StatusUpdate { probe_count: 1, open_incidents: 1 }
    ));

    let (NotificationEvent::Incident { started_at: opened, .. }, NotificationEvent::Recovery { started_at, alert, .. }) =
        (&messages[1].event, &messages[3].event)
    else {
        panic!("unexpected events: {messages:?}");
    };
    assert_eq!(opened, started_at);
    assert_eq!(alert.status, 200);
    assert_eq!(executor.calls(), 6);
}

fn resumed_probe() -> Value {
    monitored(json!({
        "id": "web",
        "interval": 3600,
        "alerts": ["status-not-2xx"],
        "requests": [{ "url": "https://example.com" }],
        "last_event": { "alert_id": "status-not-2xx", "created_at": "2024-05-01T10:00:00Z" }
    }))
}

#[tokio::test]
async fn test_symon_mode_reports_resumed_incident_on_first_cycle() {
    let recording = Arc::new(Recording::default());
    let handle = spawn(
        orchestrator(CountingExecutor::new(503), ResponseCache::disabled())
            .with_mode(ReportingMode::Symon),
        &recording,
        resumed_probe(),
    );
    let mut events = handle.subscribe();

    let first = events.recv().await.unwrap();

    assert_eq!(first.transitions.len(), 1);
    assert_eq!(first.transitions[0].emission, Emission::ResumedIncident);
    assert_eq!(
        first.transitions[0].started_at.to_rfc3339(),
        "2024-05-01T10:00:00+00:00"
    );

    // later cycles stay quiet while the target is down
    let second = handle.check_now("web").await.unwrap().unwrap();
    assert!(second.transitions.is_empty());

    handle.shutdown().await.unwrap();
    let incidents = recording
        .event_names()
        .into_iter()
        .filter(|name| *name == "incident")
        .count();
    assert_eq!(incidents, 1);
}

#[tokio::test]
async fn test_standalone_mode_stays_quiet_for_resumed_incident() {
    let executor = CountingExecutor::new(503);
    let recording = Arc::new(Recording::default());
    let handle = spawn(
        orchestrator(executor.clone(), ResponseCache::disabled()),
        &recording,
        resumed_probe(),
    );
    let mut events = handle.subscribe();

    let first = events.recv().await.unwrap();
    assert!(first.transitions.is_empty());

    // recovering closes the resumed incident with its original start time
    executor.set_status(200);
    let mut recovery = None;
    for _ in 0..5 {
        let report = handle.check_now("web").await.unwrap().unwrap();
        if !report.transitions.is_empty() {
            recovery = Some(report.transitions[0].clone());
            break;
        }
    }

    let recovery = recovery.unwrap();
    assert_eq!(recovery.emission, Emission::Recovery);
    assert_eq!(recovery.started_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

    handle.shutdown().await.unwrap();
    assert!(!recording.event_names().contains(&"incident"));
}
