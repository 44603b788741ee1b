#![cfg_attr(not(test), deny(clippy::panic))]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use slotmesh::bus::{InMemoryBus, MessageBus};
use slotmesh::config;
use slotmesh::logging;
use slotmesh::metrics::CoreMetrics;
use slotmesh::provision::{ProvisionTrigger, SlotProvisioner};
use slotmesh::registry::{ProxyRegistry, RegistryService, ServerRegistry};
use slotmesh::routing::{PlayerRoutingService, ProxyDirectory, SlotDirectory};
use slotmesh::status;

/// Slotmesh -- matchmaking and slot-routing control plane for multi-proxy
/// game networks
#[derive(Parser, Debug)]
#[command(name = "slotmesh")]
#[command(about = "In-memory matchmaking and slot-routing registry")]
#[command(version)]
struct Cli {
    /// Path to a JSON configuration file (merged over config.json and env).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate configuration and exit without starting the registry.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    /// Useful for debugging configuration loading from multiple sources.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Arc::new(config::load(cli.config.as_deref()));

    if cli.print_config {
        let json = serde_json::to_string_pretty(&*cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // config::load() already validates warn-only; capture the result here to
    // provide a proper exit code and fail startup on broken settings.
    let validation_result = config::validate(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Status port: {}", cfg.status_port);
                println!("  Route timeout: {}s", cfg.routing.route_timeout_secs);
                println!(
                    "  Reservation timeout: {}s",
                    cfg.routing.reservation_timeout_secs
                );
                println!("  Max queue wait: {}s", cfg.routing.max_queue_wait_secs);
                println!("  Max route retries: {}", cfg.routing.max_route_retries);
                println!("  Server timeout: {}s", cfg.registry.server_timeout_secs);
                println!("  Transport namespace: {}", cfg.transport.namespace);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!(e))?;

    let _log_guard = logging::init(&cfg.logging);

    let instance_id = cfg.transport.resolved_instance_id();
    tracing::info!(%instance_id, "Starting slotmesh registry");

    let metrics = Arc::new(CoreMetrics::new());
    let bus: Arc<dyn MessageBus> = InMemoryBus::with_metrics(instance_id.clone(), metrics.clone());

    let servers = Arc::new(ServerRegistry::new(instance_id.clone()));
    let proxies = Arc::new(ProxyRegistry::new());

    // Subscription order matters on the shared slot-status channel: the
    // registry merges an update before the routing service reads it back.
    let registry_service = RegistryService::start(
        bus.clone(),
        servers.clone(),
        proxies.clone(),
        metrics.clone(),
        cfg.registry.clone(),
    )
    .await;
    let eviction_sweep = registry_service.spawn_eviction_sweep();

    let provisioner = SlotProvisioner::start(bus.clone(), servers.clone(), metrics.clone()).await;

    let slot_directory: Arc<dyn SlotDirectory> = servers.clone();
    let proxy_directory: Arc<dyn ProxyDirectory> = proxies.clone();
    let provision_trigger: Arc<dyn ProvisionTrigger> = provisioner;
    let routing = PlayerRoutingService::start(
        bus.clone(),
        slot_directory,
        proxy_directory,
        provision_trigger,
        metrics.clone(),
        cfg.routing.clone(),
    )
    .await;

    let state = Arc::new(status::AppState::new(
        servers,
        proxies,
        routing.clone(),
        metrics,
    ));
    let app = status::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.status_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Status endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received; draining");
    routing.shutdown();
    eviction_sweep.abort();
    tracing::info!("Registry stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
