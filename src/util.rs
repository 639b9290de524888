const PROBE_CACHE_TTL: &str = "PROBE_CACHE_TTL";

const DEFAULT_CACHE_TTL: u64 = 300;

pub fn get_cache_ttl() -> u64 {
    let ttl_from_env = std::env::var(PROBE_CACHE_TTL);
    ttl_from_env.map_or(DEFAULT_CACHE_TTL, |res| res.parse().unwrap_or(DEFAULT_CACHE_TTL))
}

const AGENT_HOSTNAME: &str = "AGENT_HOSTNAME";

/// Host identity attached to notifications.
pub fn get_hostname() -> String {
    std::env::var(AGENT_HOSTNAME)
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| String::from("unknown"))
}

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
