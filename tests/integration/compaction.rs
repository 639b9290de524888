//! Compacted probes execute once and alert independently

use pretty_assertions::assert_eq;
use serde_json::json;
use synthetic_monitoring::cache::ResponseCache;
use tokio_util::sync::CancellationToken;

use crate::helpers::{CountingExecutor, config, orchestrator};

#[tokio::test]
async fn test_identical_probes_share_one_request() {
    let config = config(json!({
        "probes": [
            {
                "id": "shop",
                "name": "Shop",
                "interval": 30,
                "alerts": ["status-not-2xx"],
                "requests": [{ "url": "https://shop.example.com" }]
            },
            {
                "id": "shop-latency",
                "name": "Shop latency",
                "interval": 30,
                "alerts": [
                    "status-not-2xx",
                    { "id": "slow", "query": "response.time > 1000" }
                ],
                "requests": [{ "url": "https://shop.example.com" }]
            },
            {
                "id": "shop-slow-poll",
                "interval": 300,
                "requests": [{ "url": "https://shop.example.com" }]
            }
        ]
    }));

    let probes = config.resolve().unwrap();

    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].id, "shop|shop-latency");
    assert_eq!(probes[0].source_ids, vec!["shop".to_string(), "shop-latency".to_string()]);
    assert_eq!(
        probes[0].alert_ids(),
        vec!["status-not-2xx".to_string(), "slow".to_string()]
    );
    assert_eq!(probes[1].id, "shop-slow-poll");

    let executor = CountingExecutor::new(500);
    let orchestrator = orchestrator(executor.clone(), ResponseCache::disabled());
    let report = orchestrator
        .run_cycle(&probes[0], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executor.calls(), 1);
    assert_eq!(report.triggered(), vec!["status-not-2xx"]);

    // both alerts have their own bucket
    let store = orchestrator.store();
    assert_eq!(
        store
            .get("shop|shop-latency", "status-not-2xx")
            .unwrap()
            .consecutive_triggered,
        1
    );
    assert_eq!(
        store
            .get("shop|shop-latency", "slow")
            .unwrap()
            .consecutive_cleared,
        1
    );
}

#[tokio::test]
async fn test_chained_probes_are_never_merged() {
    let chain = json!([
        { "url": "https://api.example.com/login" },
        { "url": "https://api.example.com/me" }
    ]);
    let config = config(json!({
        "probes": [
            { "id": "one", "requests": chain },
            { "id": "two", "requests": chain }
        ]
    }));

    let probes = config.resolve().unwrap();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].source_ids, vec!["one".to_string()]);
}
