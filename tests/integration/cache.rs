//! Response cache in front of the executor

use std::time::Duration;

use serde_json::json;
use synthetic_monitoring::cache::ResponseCache;
use synthetic_monitoring::config::{CacheConfig, CacheKeyScope};
use synthetic_monitoring::request::TransportFailure;
use tokio_util::sync::CancellationToken;

use crate::helpers::{CountingExecutor, orchestrator, single_probe};

fn cache(ttl_secs: u64, key_scope: CacheKeyScope) -> ResponseCache {
    ResponseCache::new(&CacheConfig {
        ttl_secs,
        key_scope,
    })
}

#[tokio::test(start_paused = true)]
async fn test_identical_request_is_served_until_ttl_expires() {
    let executor = CountingExecutor::new(200);
    let orchestrator = orchestrator(executor.clone(), cache(60, CacheKeyScope::Resolved));
    let probe = single_probe(json!({
        "id": "cached",
        "requests": [{ "url": "https://example.com/health" }]
    }));
    let cancel = CancellationToken::new();

    let first = orchestrator.run_cycle(&probe, &cancel).await.unwrap();
    let second = orchestrator.run_cycle(&probe, &cancel).await.unwrap();

    assert_eq!(executor.calls(), 1);
    assert!(!first.steps[0].response.cached);
    assert!(second.steps[0].response.cached);
    assert_eq!(
        first.steps[0].response.body,
        second.steps[0].response.body
    );

    tokio::time::advance(Duration::from_secs(61)).await;

    let third = orchestrator.run_cycle(&probe, &cancel).await.unwrap();
    assert_eq!(executor.calls(), 2);
    assert!(!third.steps[0].response.cached);
}

#[tokio::test(start_paused = true)]
async fn test_key_scope_controls_sharing_between_probes() {
    let first = single_probe(json!({ "id": "a", "requests": [{ "url": "https://example.com" }] }));
    let second = single_probe(json!({ "id": "b", "requests": [{ "url": "https://example.com" }] }));
    let cancel = CancellationToken::new();

    let shared = CountingExecutor::new(200);
    let orchestrator_shared = orchestrator(shared.clone(), cache(60, CacheKeyScope::Resolved));
    orchestrator_shared.run_cycle(&first, &cancel).await.unwrap();
    orchestrator_shared.run_cycle(&second, &cancel).await.unwrap();
    assert_eq!(shared.calls(), 1);

    let separate = CountingExecutor::new(200);
    let orchestrator_separate = orchestrator(separate.clone(), cache(60, CacheKeyScope::PerProbe));
    orchestrator_separate.run_cycle(&first, &cancel).await.unwrap();
    orchestrator_separate.run_cycle(&second, &cancel).await.unwrap();
    assert_eq!(separate.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_are_not_cached() {
    let executor = CountingExecutor::new(200);
    executor.set_failure(Some(TransportFailure::ConnectionRefused));
    let orchestrator = orchestrator(executor.clone(), cache(60, CacheKeyScope::Resolved));
    let probe = single_probe(json!({ "id": "p", "requests": [{ "url": "https://example.com" }] }));
    let cancel = CancellationToken::new();

    orchestrator.run_cycle(&probe, &cancel).await.unwrap();
    orchestrator.run_cycle(&probe, &cancel).await.unwrap();

    assert_eq!(executor.calls(), 2);
    assert!(orchestrator.cache().is_empty());
}

#[tokio::test]
async fn test_zero_ttl_disables_cache() {
    let executor = CountingExecutor::new(200);
    let orchestrator = orchestrator(executor.clone(), cache(0, CacheKeyScope::Resolved));
    let probe = single_probe(json!({ "id": "p", "requests": [{ "url": "https://example.com" }] }));
    let cancel = CancellationToken::new();

    orchestrator.run_cycle(&probe, &cancel).await.unwrap();
    orchestrator.run_cycle(&probe, &cancel).await.unwrap();

    assert_eq!(executor.calls(), 2);
}
