//! Request execution
//!
//! A probe step is described by a [`RequestTemplate`](template::RequestTemplate),
//! resolved against earlier responses of the same cycle into a
//! [`ResolvedRequest`] and executed by a [`RequestExecutor`]. Whatever happens
//! on the wire, the result is a [`ResponseEnvelope`].

pub mod body;
pub mod error;
pub mod executor;
pub mod template;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{HttpMethod, SocketConfig};

pub use error::TransportFailure;
pub use executor::HttpExecutor;

/// A fully resolved request, ready to go on the wire.
///
/// This is also the input of the response cache key, so every field that
/// changes the outcome of a request belongs here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
    pub allow_unauthorized: bool,
    pub ping: bool,
}

impl ResolvedRequest {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Value of the `content-type` header, matched case-insensitively.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    /// Host part of the URL, or the URL itself when it is not a valid URL.
    pub fn host(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseResult {
    /// The target answered, whatever the answer was
    Success,

    /// No answer, see the transport failure
    Failed,
}

/// Uniform result of executing one request step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// HTTP status, or the sentinel code of the transport failure
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub size: usize,
    pub response_time_ms: u64,
    pub result: ResponseResult,
    pub error: Option<String>,
    pub failure: Option<TransportFailure>,

    /// Served from the response cache
    pub cached: bool,
}

impl ResponseEnvelope {
    /// Envelope of a real answer. Bodies that parse as JSON are kept as JSON.
    pub fn answered(
        status: u16,
        headers: BTreeMap<String, String>,
        raw_body: &[u8],
        response_time_ms: u64,
    ) -> Self {
        let body = serde_json::from_slice::<Value>(raw_body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw_body).into_owned()));

        Self {
            status,
            headers,
            body,
            size: raw_body.len(),
            response_time_ms,
            result: ResponseResult::Success,
            error: None,
            failure: None,
            cached: false,
        }
    }

    pub fn failed(failure: TransportFailure, detail: Option<&str>, response_time_ms: u64) -> Self {
        Self {
            status: failure.code(),
            headers: BTreeMap::new(),
            body: Value::Null,
            size: 0,
            response_time_ms,
            result: ResponseResult::Failed,
            error: Some(failure.describe(detail)),
            failure: Some(failure),
            cached: false,
        }
    }

    pub fn from_ping(outcome: &PingOutcome) -> Self {
        if outcome.alive {
            Self::answered(200, BTreeMap::new(), &[], outcome.response_time_ms)
        } else {
            Self::failed(
                TransportFailure::HostUnreachable,
                None,
                outcome.response_time_ms,
            )
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ResponseResult::Success
    }

    /// The response as seen by templates and alert expressions.
    pub fn to_context(&self) -> Value {
        json!({
            "status": self.status,
            "headers": self.headers,
            "body": self.body,
            "time": self.response_time_ms,
            "size": self.size,
            "error": self.error,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingOutcome {
    pub alive: bool,
    pub response_time_ms: u64,
}

/// Capability to perform network checks.
///
/// Implementations never fail: transport problems are reported as failed
/// envelopes with a [`TransportFailure`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &ResolvedRequest) -> ResponseEnvelope;

    async fn ping(&self, host: &str, timeout: Duration) -> PingOutcome;

    async fn socket(&self, socket: &SocketConfig) -> ResponseEnvelope;
}
