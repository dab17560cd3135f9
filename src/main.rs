//! echoprobe - on-demand ping probes exposed as OpenMetrics.
//!
//! Each request to the probe endpoint pings one target and answers with
//! gauges describing that single run.

mod config;
mod metrics;
mod probe;
mod web;

use config::ServerConfig;
use probe::{IcmpPinger, ProbeRunner};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when `RUST_LOG` is unset or unparsable.
const DEFAULT_LOG_DIRECTIVE: &str = "echoprobe=info";

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(log_filter(rust_log.as_deref()))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting echoprobe on {}:{}...", cfg.listen_addr, cfg.http_port);
    tracing::info!("Probe endpoint at {}", cfg.probe_path);

    let runner = ProbeRunner::new(Arc::new(IcmpPinger));

    // Start web server
    let server = Server::new(cfg, runner);
    server.start().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_default() {
        let filter = log_filter(Some("echoprobe=debug")).to_string();
        assert!(filter.contains("echoprobe=debug"), "{filter}");
        assert!(!filter.contains("echoprobe=info"), "{filter}");
    }

    #[test]
    fn test_default_log_filter() {
        assert!(log_filter(None).to_string().contains(DEFAULT_LOG_DIRECTIVE));

        let fallback = log_filter(Some("echoprobe=loud")).to_string();
        assert!(fallback.contains(DEFAULT_LOG_DIRECTIVE), "{fallback}");
    }
}
