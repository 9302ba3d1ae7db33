#![forbid(unsafe_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use opdisco_controller::{ControllerConfig, KubeStore, Reconciler};
use opdisco_core::parse_gvk_key;
use opdisco_decorators::{OperatorFactory, Scheme};
use opdisco_kubehub::{get_kube_client, run_discovery, sync_kinds, watch_components, DynamicKindSource, KindFilter};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "opdisco-manager", version, about = "Keeps Operator status in sync with labeled components")]
struct Cli {
    /// Tracing filter, e.g. "info,opdisco_controller=debug"
    #[arg(long, env = "OPDISCO_LOG", default_value = "info")]
    log: String,

    /// Serve Prometheus metrics on host:port
    #[arg(long = "metrics-addr", env = "OPDISCO_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Operators reconciled concurrently
    #[arg(long, env = "OPDISCO_WORKERS", default_value_t = 2)]
    workers: u16,

    /// Seconds between API discovery passes
    #[arg(long = "discovery-interval-secs", env = "OPDISCO_DISCOVERY_INTERVAL_SECS", default_value_t = 60)]
    discovery_interval_secs: u64,

    /// Component kinds to watch, e.g. "v1/ConfigMap,apps/v1/Deployment". Empty watches every listable kind.
    #[arg(long, env = "OPDISCO_KINDS", value_delimiter = ',')]
    kinds: Vec<String>,

    /// Capacity of the component event channel feeding the controller
    #[arg(long = "event-buffer", env = "OPDISCO_EVENT_BUFFER", default_value_t = 1024)]
    event_buffer: usize,

    /// First retry delay after a failed reconcile
    #[arg(long = "backoff-base-ms", env = "OPDISCO_BACKOFF_BASE_MS", default_value_t = 500)]
    backoff_base_ms: u64,

    /// Upper bound on retry delays
    #[arg(long = "backoff-max-secs", env = "OPDISCO_BACKOFF_MAX_SECS", default_value_t = 300)]
    backoff_max_secs: u64,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    init_metrics(cli.metrics_addr.as_deref());

    let client = get_kube_client().await?;
    let kinds = Arc::new(DynamicKindSource::new());
    let filter = seed_kinds(&kinds, &cli.kinds)?;

    match sync_kinds(client.clone(), &kinds, &filter).await {
        Ok(report) => info!(activated = report.activated, unserved = report.unserved, "initial discovery"),
        Err(e) => warn!(error = ?e, "initial discovery failed; retrying in the background"),
    }
    let interval = Duration::from_secs(cli.discovery_interval_secs.max(1));
    tokio::spawn(run_discovery(client.clone(), Arc::clone(&kinds), filter, interval));

    let config = cli.controller_config();
    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Arc::new(Reconciler::new(store, OperatorFactory::new(Arc::new(Scheme::new())), Arc::clone(&kinds)));

    let (component_tx, component_rx) = mpsc::channel(cli.event_buffer.max(1));
    tokio::spawn(watch_components(client.clone(), Arc::clone(&kinds), component_tx));

    // Returns on ctrl-c once in-flight reconciles finish.
    opdisco_controller::run(client, reconciler, component_rx, config).await;
    info!("shut down");
    Ok(())
}

/// Register the configured kinds so they show up as failed when discovery
/// cannot serve them, and restrict activation to them.
fn seed_kinds(kinds: &DynamicKindSource, keys: &[String]) -> Result<KindFilter> {
    let keys: Vec<&str> = keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return Ok(KindFilter::All);
    }
    let mut seeds = Vec::with_capacity(keys.len());
    for key in keys {
        let gvk = parse_gvk_key(key).with_context(|| format!("invalid kind {:?} in OPDISCO_KINDS", key))?;
        kinds.register(gvk);
        seeds.push(key.to_string());
    }
    Ok(KindFilter::only(seeds))
}

fn init_tracing(directives: &str) {
    let filter = tracing_subscriber::EnvFilter::from_str(directives).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        }
    } else {
        warn!(addr = %addr, "invalid OPDISCO_METRICS_ADDR; expected host:port");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_seed_list_watches_everything() {
        let kinds = DynamicKindSource::new();
        assert!(matches!(seed_kinds(&kinds, &[]).unwrap(), KindFilter::All));
        assert!(matches!(seed_kinds(&kinds, &[" ".into()]).unwrap(), KindFilter::All));
        assert!(kinds.active_kinds().is_empty());
    }

    #[test]
    fn seeds_are_registered_and_filter_activation() {
        let kinds = DynamicKindSource::new();
        let filter = seed_kinds(&kinds, &["v1/ConfigMap".into(), " apps/v1/Deployment".into()]).unwrap();
        assert!(filter.allows("v1/ConfigMap"));
        assert!(filter.allows("apps/v1/Deployment"));
        assert!(!filter.allows("v1/Secret"));
        assert_eq!(kinds.active_kinds().len(), 2);
    }

    #[test]
    fn malformed_seed_is_rejected() {
        let kinds = DynamicKindSource::new();
        assert!(seed_kinds(&kinds, &["ConfigMap".into()]).is_err());
    }

    #[test]
    fn cli_reads_comma_separated_kinds() {
        let cli = Cli::parse_from(["opdisco-manager", "--kinds", "v1/ConfigMap,apps/v1/Deployment", "--workers", "4"]);
        assert_eq!(cli.kinds, vec!["v1/ConfigMap", "apps/v1/Deployment"]);
        let config = cli.controller_config();
        assert_eq!(config.workers, 4);
        assert_eq!(config.backoff_base, Duration::from_millis(500));
    }
}
