//! Hot reload keeps the state of unchanged probes

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use synthetic_monitoring::actors::{ReloadSummary, SupervisorHandle};
use synthetic_monitoring::cache::ResponseCache;
use synthetic_monitoring::config::read_config_file;
use synthetic_monitoring::monitors::Emission;
use tokio_util::sync::CancellationToken;

use crate::helpers::{CountingExecutor, Recording, config, orchestrator, registry_with};

fn probe(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "interval": 3600,
        "alerts": ["status-not-2xx"],
        "incident_threshold": 1,
        "requests": [{ "url": format!("https://example.com/{id}") }]
    })
}

#[tokio::test]
async fn test_reload_from_file_preserves_unchanged_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("monitor.json");
    let notifications = json!([{ "id": "rec", "type": "recording" }]);

    std::fs::write(
        &path,
        json!({ "probes": [probe("a"), probe("b")], "notifications": notifications }).to_string(),
    )
    .unwrap();

    let recording = Arc::new(Recording::default());
    let orchestrator = Arc::new(orchestrator(CountingExecutor::new(500), ResponseCache::disabled()));
    let handle = SupervisorHandle::spawn(
        &read_config_file(&path).unwrap(),
        orchestrator.clone(),
        registry_with(recording.clone()),
        CancellationToken::new(),
    )
    .unwrap();
    let mut events = handle.subscribe();

    for _ in 0..2 {
        let report = events.recv().await.unwrap();
        assert_eq!(report.transitions.len(), 1);
    }
    assert_eq!(orchestrator.incidents().open_incidents().len(), 2);

    std::fs::write(
        &path,
        json!({ "probes": [probe("a"), probe("c")], "notifications": notifications }).to_string(),
    )
    .unwrap();
    let summary = handle.reload(read_config_file(&path).unwrap()).await.unwrap();

    assert_eq!(
        summary,
        ReloadSummary {
            kept: vec!["a".to_string()],
            added: vec!["c".to_string()],
            removed: vec!["b".to_string()],
            regrouped: vec![],
        }
    );
    assert!(orchestrator.store().get("b", "status-not-2xx").is_none());

    // "a" is still down and does not report again, "c" is new
    let a = handle.check_now("a").await.unwrap().unwrap();
    assert!(a.transitions.is_empty());
    assert!(orchestrator.store().get("a", "status-not-2xx").unwrap().is_down);

    handle.check_now("c").await.unwrap().unwrap();

    let open: Vec<String> = orchestrator
        .incidents()
        .open_incidents()
        .into_iter()
        .map(|incident| incident.probe_id)
        .collect();
    assert!(open.contains(&"a".to_string()));
    assert!(open.contains(&"c".to_string()));
    assert!(!open.contains(&"b".to_string()));

    let incidents_of_a = recording
        .messages()
        .iter()
        .filter_map(|message| message.event.alert())
        .filter(|alert| alert.probe_id == "a")
        .count();
    assert_eq!(incidents_of_a, 1);

    handle.shutdown().await.unwrap();
}

/// Probes differing only in their id, compacted into one.
fn storefront(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "interval": 3600,
        "alerts": ["status-not-2xx"],
        "incident_threshold": 1,
        "recovery_threshold": 1,
        "requests": [{ "url": "https://shop.example.com" }]
    })
}

fn with_recording(probes: Vec<serde_json::Value>) -> synthetic_monitoring::config::Config {
    config(json!({
        "probes": probes,
        "notifications": [{ "id": "rec", "type": "recording" }]
    }))
}

#[tokio::test]
async fn test_regrouping_carries_open_incident() {
    let executor = CountingExecutor::new(500);
    let recording = Arc::new(Recording::default());
    let orchestrator = Arc::new(orchestrator(executor.clone(), ResponseCache::disabled()));
    let handle = SupervisorHandle::spawn(
        &with_recording(vec![storefront("a")]),
        orchestrator.clone(),
        registry_with(recording.clone()),
        CancellationToken::new(),
    )
    .unwrap();
    let mut events = handle.subscribe();

    let first = events.recv().await.unwrap();
    assert_eq!(first.transitions.len(), 1);
    let opened_at = first.transitions[0].started_at;

    // an identical probe joins, both now run as "a|b"
    let summary = handle
        .reload(with_recording(vec![storefront("a"), storefront("b")]))
        .await
        .unwrap();
    assert_eq!(
        summary,
        ReloadSummary {
            kept: vec![],
            added: vec![],
            removed: vec!["a".to_string()],
            regrouped: vec!["a|b".to_string()],
        }
    );

    let joint = handle.check_now("a|b").await.unwrap().unwrap();
    assert!(joint.transitions.is_empty());
    assert!(orchestrator.store().get("a|b", "status-not-2xx").unwrap().is_down);
    assert!(orchestrator.store().get("a", "status-not-2xx").is_none());

    let open = orchestrator.incidents().open_incidents();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].probe_id, "a|b");
    assert_eq!(open[0].created_at, opened_at);

    // "b" leaves again and "a" recovers the original incident
    executor.set_status(200);
    let summary = handle
        .reload(with_recording(vec![storefront("a")]))
        .await
        .unwrap();
    assert_eq!(summary.regrouped, vec!["a".to_string()]);
    assert_eq!(summary.removed, vec!["a|b".to_string()]);

    let recovered = loop {
        let report = events.recv().await.unwrap();
        if report.probe_id == "a" {
            break report;
        }
    };
    assert_eq!(recovered.transitions.len(), 1);
    assert_eq!(recovered.transitions[0].emission, Emission::Recovery);
    assert_eq!(recovered.transitions[0].started_at, opened_at);
    assert!(orchestrator.incidents().open_incidents().is_empty());

    handle.shutdown().await.unwrap();
    let names = recording.event_names();
    assert_eq!(names.iter().filter(|name| **name == "incident").count(), 1);
    assert_eq!(names.iter().filter(|name| **name == "recovery").count(), 1);
}

#[tokio::test]
async fn test_interval_change_keeps_actor_running() {
    let executor = CountingExecutor::new(200);
    let orchestrator = Arc::new(orchestrator(executor.clone(), ResponseCache::disabled()));
    let handle = SupervisorHandle::spawn(
        &with_recording(vec![probe("a")]),
        orchestrator,
        registry_with(Arc::new(Recording::default())),
        CancellationToken::new(),
    )
    .unwrap();
    let mut events = handle.subscribe();
    events.recv().await.unwrap();
    assert_eq!(executor.calls(), 1);

    let mut slower = probe("a");
    slower["interval"] = json!(7200);
    let summary = handle.reload(with_recording(vec![slower])).await.unwrap();
    assert_eq!(summary.kept, vec!["a".to_string()]);
    assert_eq!(handle.probes().await.unwrap()[0].interval_secs, 7200);

    // a restarted actor would have ticked right away
    handle.check_now("a").await.unwrap().unwrap();
    assert_eq!(executor.calls(), 2);

    // a changed request restarts it
    let mut moved = probe("a");
    moved["requests"] = json!([{ "url": "https://example.com/moved" }]);
    handle.reload(with_recording(vec![moved])).await.unwrap();
    let report = handle.check_now("a").await.unwrap().unwrap();
    assert_eq!(report.steps[0].url, "https://example.com/moved");
    assert_eq!(executor.calls(), 4);

    handle.shutdown().await.unwrap();
}

#[test]
fn test_yaml_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("monitor.yaml");
    std::fs::write(
        &path,
        r#"
probes:
  - id: api
    interval: 15
    requests:
      - url: https://api.example.com/health
        method: HEAD
cache:
  ttl_secs: 0
"#,
    )
    .unwrap();

    let config = read_config_file(&path).unwrap();
    let probes = config.resolve().unwrap();

    assert_eq!(probes[0].id, "api");
    assert_eq!(probes[0].interval.as_secs(), 15);
    assert_eq!(config.cache.ttl_secs, 0);
}
