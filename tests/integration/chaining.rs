//! Multi-step probes against a mock server

use std::sync::Arc;

use serde_json::json;
use synthetic_monitoring::cache::ResponseCache;
use synthetic_monitoring::request::HttpExecutor;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{orchestrator, single_probe};

#[tokio::test]
async fn test_second_step_uses_id_from_first_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": 7 }] })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Ada" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let probe = single_probe(json!({
        "id": "users",
        "requests": [
            { "url": format!("{uri}/users") },
            { "url": format!("{uri}/users/{{{{responses.[0].body.data.[0].id}}}}") }
        ]
    }));
    let orchestrator = orchestrator(Arc::new(HttpExecutor::new().unwrap()), ResponseCache::disabled());

    let report = orchestrator
        .run_cycle(&probe, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.completed);
    assert_eq!(report.steps[1].url, format!("{uri}/users/7"));
    assert_eq!(report.steps[1].response.body, json!({ "name": "Ada" }));
    assert!(report.triggered().is_empty());
}

#[tokio::test]
async fn test_token_flows_into_header_and_form_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "abc" })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(header("authorization", "Bearer abc"))
        .and(body_string("token=abc&user=ada"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let probe = single_probe(json!({
        "id": "login",
        "requests": [
            { "method": "POST", "url": format!("{uri}/login") },
            {
                "method": "POST",
                "url": format!("{uri}/session"),
                "headers": {
                    "Authorization": "Bearer {{responses.[0].body.token}}",
                    "Content-Type": "application/x-www-form-urlencoded"
                },
                "body": { "user": "ada", "token": "{{responses.[0].body.token}}" }
            }
        ]
    }));
    let orchestrator = orchestrator(Arc::new(HttpExecutor::new().unwrap()), ResponseCache::disabled());

    let report = orchestrator
        .run_cycle(&probe, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.completed);
    assert_eq!(report.steps[1].response.status, 204);
}

#[tokio::test]
async fn test_missing_path_resolves_to_empty() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let probe = single_probe(json!({
        "id": "items",
        "alerts": ["status-not-2xx"],
        "requests": [
            { "url": format!("{uri}/first") },
            { "url": format!("{uri}/items/{{{{responses.[0].body.missing}}}}") }
        ]
    }));
    let orchestrator = orchestrator(Arc::new(HttpExecutor::new().unwrap()), ResponseCache::disabled());

    let report = orchestrator
        .run_cycle(&probe, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.steps[1].url, format!("{uri}/items/"));
    assert_eq!(report.triggered(), vec!["status-not-2xx#1"]);
}

#[tokio::test]
async fn test_transport_failure_stops_chain() {
    let probe = single_probe(json!({
        "id": "down",
        "alerts": [{ "id": "unreachable", "query": "response.status < 100" }],
        "requests": [
            { "url": "http://127.0.0.1:9/first", "timeout": 500 },
            { "url": "http://127.0.0.1:9/second" }
        ]
    }));
    let orchestrator = orchestrator(Arc::new(HttpExecutor::new().unwrap()), ResponseCache::disabled());

    let report = orchestrator
        .run_cycle(&probe, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.completed);
    assert_eq!(report.steps.len(), 1);
    assert!(!report.steps[0].response.is_success());
    assert_eq!(report.triggered(), vec!["unreachable#0"]);
}
