//! Luxbridge service daemon
//!
//! Wires the full data plane: ArtNet and sACN listeners feed the mapping
//! engine, the discovery service finds LAN devices, and the sender and
//! poller workers drive them. The device store here is the in-memory
//! implementation; deployments with persistence swap in their own
//! [`luxbridge_core::DeviceStore`].
//!
//! Usage: `luxbridge-service [config.json]`

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use luxbridge_core::{BridgeConfig, DeviceStore, EventBus, MetricsHandle};
use luxbridge_discovery::DiscoveryService;
use luxbridge_dmx::{ArtnetService, MappingEngine, SacnService};
use luxbridge_protocol::HandlerRegistry;
use luxbridge_test_utils::MemoryStore;
use luxbridge_worker::{
    CommandTransport, DevicePollerService, DeviceSenderService, DryRunTransport,
    UdpCommandTransport,
};

fn load_config() -> Result<BridgeConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("failed to parse config {path}"))
        }
        None => Ok(BridgeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(load_config()?.normalise());
    info!(
        dry_run = config.dry_run,
        artnet_port = config.artnet_port,
        sacn_port = config.sacn_port,
        "starting luxbridge"
    );

    let store: Arc<dyn DeviceStore> = Arc::new(MemoryStore::new());
    let metrics: MetricsHandle = luxbridge_core::metrics::noop();
    let bus = EventBus::new();
    let registry = Arc::new(HandlerRegistry::builtin());

    // Start order: engine first so listeners never feed a missing
    // snapshot, then ingress, then discovery, then the workers.
    let engine = Arc::new(MappingEngine::new(
        config.clone(),
        store.clone(),
        metrics.clone(),
    ));
    engine
        .clone()
        .start(Some(&bus))
        .await
        .context("mapping engine failed to start")?;

    let mut artnet = ArtnetService::new(config.clone(), engine.clone(), metrics.clone());
    artnet.start().await.context("ArtNet listener failed to start")?;

    let mut sacn = SacnService::new(config.clone(), engine.clone(), metrics.clone());
    sacn.start().await.context("sACN listener failed to start")?;

    let mut discovery = DiscoveryService::new(config.clone(), store.clone(), metrics.clone());
    discovery
        .start()
        .await
        .context("discovery service failed to start")?;

    let transport: Arc<dyn CommandTransport> = if config.dry_run {
        Arc::new(DryRunTransport)
    } else {
        Arc::new(UdpCommandTransport::bind().await?)
    };
    let mut sender = DeviceSenderService::new(
        config.clone(),
        store.clone(),
        registry.clone(),
        transport,
        metrics.clone(),
    );
    sender.start().await?;

    let mut poller =
        DevicePollerService::new(config.clone(), store.clone(), registry.clone(), metrics.clone());
    poller.start().await?;

    info!("luxbridge running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // Reverse order: stop producing before stopping consumers, flush
    // the engine last so observed payloads reach the store.
    poller.stop().await;
    sender.stop().await;
    discovery.stop().await;
    sacn.stop().await;
    artnet.stop().await;
    engine.stop().await;

    info!("luxbridge stopped");
    Ok(())
}
