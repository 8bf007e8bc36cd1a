//! service-dns - Service-discovery DNS server
//!
//! This is the composition root that wires together all the components.

use service_dns::adapters::inbound::DnsServer;
use service_dns::adapters::outbound::DashMapCatalog;
use service_dns::config::load_config;
use service_dns::infrastructure::{shutdown_signal, ShutdownController};
use service_dns::{build_router, CatalogDataFetcher};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting service-dns datacenter={} domain={} listen={}",
        cfg.datacenter,
        cfg.dns.domain,
        cfg.listen_addr
    );

    // ===== COMPOSITION ROOT =====

    // 1. Catalog backend (DashMap, optionally seeded from JSON)
    let catalog = match &cfg.catalog_path {
        Some(path) => {
            let catalog = DashMapCatalog::load_file(cfg.datacenter.clone(), path)?;
            tracing::info!(
                "catalog loaded from {} (nodes={} services={})",
                path,
                catalog.node_count(),
                catalog.service_count()
            );
            if cfg.catalog_reload_secs > 0 {
                catalog.start_reload(path.into(), Duration::from_secs(cfg.catalog_reload_secs));
            }
            catalog
        }
        None => {
            tracing::warn!("no catalog seed configured, serving an empty catalog");
            DashMapCatalog::new(cfg.datacenter.clone())
        }
    };
    let fetcher: Arc<dyn CatalogDataFetcher> = Arc::new(catalog);

    // 2. Application: resolution engine + response assembly
    let router = Arc::new(build_router(&cfg.dns, fetcher));

    // 3. Inbound transport, stopped by SIGINT/SIGTERM
    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let server = DnsServer::bind(&cfg.listen_addr, router).await?;
    server.run(shutdown.clone()).await?;

    if !shutdown.wait_for_drain(Duration::from_secs(5)).await {
        tracing::warn!("exiting with open DNS sessions");
    }
    tracing::info!("service-dns stopped");
    Ok(())
}
