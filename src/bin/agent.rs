use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use clap::Parser;
use synthetic_monitoring::{
    actors::SupervisorHandle,
    cache::ResponseCache,
    config::{CacheConfig, Config, read_config_file},
    monitors::ReportingMode,
    notify::{ChannelRegistry, Dispatcher},
    orchestrator::Orchestrator,
    request::HttpExecutor,
};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Synthetic monitoring agent")]
struct Args {
    /// Config file (JSON, or YAML by extension)
    #[arg(short, long, default_value = "monitor.json")]
    config: PathBuf,

    /// Report probes resumed in the unhealthy state on their first cycle
    #[arg(long)]
    symon_mode: bool,

    /// Response cache TTL in seconds, overrides the config file
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// Disable the response cache
    #[arg(long)]
    no_cache: bool,

    /// Seconds between checks of the config file for changes (0 disables reloading)
    #[arg(long, default_value_t = 5)]
    reload_interval: u64,

    /// Log everything this crate emits
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("synthetic_monitoring", level),
        ("probe_agent", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn cache_config(args: &Args, config: &Config) -> CacheConfig {
    let mut cache = config.cache.clone();
    if let Some(ttl) = args.cache_ttl {
        cache.ttl_secs = ttl;
    }
    if args.no_cache {
        cache.ttl_secs = 0;
    }
    cache
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.config)?;

    let mode = if args.symon_mode || config.symon_mode {
        ReportingMode::Symon
    } else {
        ReportingMode::Standalone
    };
    let cache = Arc::new(ResponseCache::new(&cache_config(&args, &config)));
    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(HttpExecutor::new()?),
            cache.clone(),
            Dispatcher::empty(),
        )
        .with_mode(mode),
    );

    let cancel = CancellationToken::new();
    let supervisor = SupervisorHandle::spawn(
        &config,
        orchestrator,
        ChannelRegistry::default(),
        cancel.clone(),
    )
    .context("invalid configuration")?;

    info!(
        "monitoring {} probe(s) from {}",
        supervisor.probes().await?.len(),
        args.config.display()
    );

    tokio::select! {
        _ = watch_config(&args, &supervisor) => {}
        _ = purge_cache(&cache) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {e}");
            }
            info!("shutting down");
        }
    }

    supervisor.shutdown().await?;
    cancel.cancel();

    Ok(())
}

/// Poll the modification time of the config file and reload on change.
#[instrument(skip_all)]
async fn watch_config(args: &Args, supervisor: &SupervisorHandle) {
    if args.reload_interval == 0 {
        return std::future::pending().await;
    }

    let mut last_modified = modified(&args.config);
    let mut ticker = interval(Duration::from_secs(args.reload_interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let current = modified(&args.config);
        if current == last_modified {
            continue;
        }
        last_modified = current;
        debug!("{} changed, reloading", args.config.display());

        let config = match read_config_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                error!("{e:#}");
                continue;
            }
        };

        match supervisor.reload(config).await {
            Ok(summary) => info!(
                "reloaded: {} kept, {} added, {} removed",
                summary.kept.len(),
                summary.added.len(),
                summary.removed.len()
            ),
            Err(e) => error!("reload failed: {e:#}"),
        }
    }
}

async fn purge_cache(cache: &ResponseCache) {
    if !cache.is_enabled() {
        return std::future::pending().await;
    }

    let mut ticker = interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let purged = cache.purge_expired();
        if purged > 0 {
            trace!("purged {purged} expired cache entries");
        }
    }
}
