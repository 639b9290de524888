//! Time-boxed response cache
//!
//! Identical requests issued again within the TTL are answered from memory.
//! This only reduces outbound traffic: staleness inside the TTL window is
//! accepted and failed responses are never stored.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::trace;

use crate::config::{CacheConfig, CacheKeyScope};
use crate::request::{ResolvedRequest, ResponseEnvelope};

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ResponseEnvelope,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    scope: CacheKeyScope,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(config.ttl_secs),
            scope: config.key_scope,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            ttl_secs: 0,
            key_scope: CacheKeyScope::default(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Stable hash of a request description.
    ///
    /// With [`CacheKeyScope::PerProbe`] the probe id and step index are part of
    /// the key, so equal requests from different probes do not share entries.
    pub fn key(&self, request: &ResolvedRequest, probe_id: &str, step: usize) -> String {
        let description = match self.scope {
            CacheKeyScope::Resolved => json!({ "request": request }),
            CacheKeyScope::PerProbe => json!({
                "request": request,
                "probe": probe_id,
                "step": step,
            }),
        };

        let digest = Sha256::digest(description.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Look up a live entry. Expired entries are dropped on the way.
    pub fn get(&self, key: &str) -> Option<ResponseEnvelope> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                let mut response = entry.response.clone();
                response.cached = true;
                trace!("cache hit for {key}");
                return Some(response);
            }
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Store a response. Transport failures are ignored.
    pub fn put(&self, key: String, response: &ResponseEnvelope) {
        if !self.is_enabled() || !response.is_success() {
            return;
        }

        let mut response = response.clone();
        response.cached = false;

        self.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
