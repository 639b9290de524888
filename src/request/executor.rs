//! Network-backed [`RequestExecutor`]
//!
//! HTTP requests go through a pair of shared reqwest clients (one of them
//! accepting invalid certificates), ping steps shell out to the system `ping`
//! binary and socket checks use a plain Tokio TCP stream.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{instrument, trace, warn};

use super::body::{self, ContentType};
use super::{
    PingOutcome, RequestExecutor, ResolvedRequest, ResponseEnvelope, TransportFailure,
};
use crate::config::{HttpMethod, SocketConfig};

static PING_TIME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").ok());

const SOCKET_READ_BUFFER: usize = 64 * 1024;

pub struct HttpExecutor {
    client: reqwest::Client,

    /// Used for steps with `allow_unauthorized`
    insecure_client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .build()
                .context("failed to build HTTP client")?,
            insecure_client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .context("failed to build HTTP client")?,
        })
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }

    fn headers(headers: &HeaderMap) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }

    async fn http(&self, request: &ResolvedRequest) -> ResponseEnvelope {
        let client = if request.allow_unauthorized {
            &self.insecure_client
        } else {
            &self.client
        };

        let mut builder = client
            .request(Self::method(request.method), &request.url)
            .timeout(request.timeout());

        for (name, value) in &request.headers {
            // the encoded body decides the final content-type
            if request.body.is_some() && name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            builder = builder.header(name, value);
        }

        if let Some(value) = &request.body {
            let content_type = ContentType::from_header(request.content_type());
            match body::serialize(&content_type, value) {
                Ok(encoded) => {
                    builder = builder
                        .header(CONTENT_TYPE, encoded.content_type)
                        .body(encoded.bytes);
                }
                Err(e) => {
                    warn!("cannot encode request body for {}: {e}", request.url);
                    return ResponseEnvelope::failed(
                        TransportFailure::Unknown,
                        Some(&e.to_string()),
                        0,
                    );
                }
            }
        }

        let start = Instant::now();

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let failure = TransportFailure::from_reqwest(&e);
                trace!("{}: {} ({e})", request.url, failure.name());
                return ResponseEnvelope::failed(failure, Some(&e.to_string()), elapsed);
            }
        };

        let status = response.status().as_u16();
        let headers = Self::headers(response.headers());

        match response.bytes().await {
            Ok(bytes) => {
                let elapsed = start.elapsed().as_millis() as u64;
                ResponseEnvelope::answered(status, headers, &bytes, elapsed)
            }
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let failure = TransportFailure::from_reqwest(&e);
                ResponseEnvelope::failed(failure, Some(&e.to_string()), elapsed)
            }
        }
    }

    async fn exchange(socket: &SocketConfig) -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect((socket.host.as_str(), socket.port)).await?;

        let Some(data) = &socket.data else {
            return Ok(Vec::new());
        };

        stream.write_all(data.as_bytes()).await?;
        stream.flush().await?;

        let mut buffer = vec![0; SOCKET_READ_BUFFER];
        let read = stream.read(&mut buffer).await?;
        buffer.truncate(read);
        Ok(buffer)
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn execute(&self, request: &ResolvedRequest) -> ResponseEnvelope {
        if request.ping {
            let outcome = self.ping(&request.host(), request.timeout()).await;
            return ResponseEnvelope::from_ping(&outcome);
        }

        self.http(request).await
    }

    #[instrument(skip(self))]
    async fn ping(&self, host: &str, timeout: Duration) -> PingOutcome {
        let wait_secs = timeout.as_secs().max(1).to_string();
        let start = Instant::now();

        let output = tokio::time::timeout(
            timeout + Duration::from_secs(1),
            Command::new("ping")
                .args(["-c", "1", "-W", &wait_secs, host])
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let elapsed = start.elapsed().as_millis() as u64;

        match output {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let response_time_ms = PING_TIME
                    .as_ref()
                    .and_then(|re| re.captures(&stdout))
                    .and_then(|captures| captures[1].parse::<f64>().ok())
                    .map_or(elapsed, |ms| ms.round() as u64);

                PingOutcome {
                    alive: true,
                    response_time_ms,
                }
            }
            Ok(Ok(_)) => PingOutcome {
                alive: false,
                response_time_ms: elapsed,
            },
            Ok(Err(e)) => {
                warn!("cannot run ping for {host}: {e}");
                PingOutcome {
                    alive: false,
                    response_time_ms: elapsed,
                }
            }
            Err(_) => PingOutcome {
                alive: false,
                response_time_ms: elapsed,
            },
        }
    }

    #[instrument(skip(self, socket), fields(host = %socket.host, port = socket.port))]
    async fn socket(&self, socket: &SocketConfig) -> ResponseEnvelope {
        let timeout = Duration::from_millis(socket.timeout);
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, Self::exchange(socket)).await;
        let elapsed = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(reply)) => ResponseEnvelope::answered(200, BTreeMap::new(), &reply, elapsed),
            Ok(Err(e)) => {
                ResponseEnvelope::failed(TransportFailure::from_io(&e), Some(&e.to_string()), elapsed)
            }
            Err(_) => ResponseEnvelope::failed(TransportFailure::Timeout, None, elapsed),
        }
    }
}
