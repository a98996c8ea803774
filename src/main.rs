// dns-mirror: mirrors cluster task/agent/framework state from the operator
// event stream into DNS records pushed to a key-value zone sink.

use std::sync::Arc;
use tracing::{error, info};

use dns_mirror::config;
use dns_mirror::metrics::Metrics;
use dns_mirror::mirror;
use dns_mirror::projector::{Projector, ProjectorConfig};
use dns_mirror::sink::LoggingZoneSink;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "dns-mirror starting");

    let cfg = match config::load_config() {
        Ok(cfg) => {
            info!(master_url = %cfg.master_url, zone = %cfg.zone, "config loaded");
            cfg
        }
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(Metrics::default());
    let mirror_handle = mirror::spawn(cfg.clone(), metrics.clone());

    let sub = match mirror_handle.subscribe("projector").await {
        Ok(sub) => sub,
        Err(e) => {
            error!(error = %e, "projector failed to subscribe to mirror");
            std::process::exit(1);
        }
    };

    let sink = Arc::new(LoggingZoneSink::new());
    let projector = Projector::new(
        ProjectorConfig {
            zone: cfg.zone.clone(),
            leader_ip: cfg.leader_ip,
            resolvers: cfg.resolvers.clone(),
            push_zone_timeout: cfg.push_zone_timeout,
            masters_timeout: cfg.masters_timeout,
        },
        sink,
    );

    projector.run(sub).await;
}
