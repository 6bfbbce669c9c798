mod api;
mod config;
mod error;
mod reconciler;
mod routes;
mod sync;

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use api::rest::AppState;
use config::Config;
use reconciler::RouteReconciler;
use routes::inventory::LocalNetworkInventory;
use routes::netlink::NetlinkRouteTable;
use routes::table::KernelRouteTable;
use sync::SyncService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("pod-route-sync starting...");
    match &config.config_path {
        Some(path) => tracing::info!("Loaded configuration from: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    let table = Arc::new(NetlinkRouteTable::new().context("unable to open netlink socket")?);

    if let Some(cidr) = &config.cleanup {
        let network = routes::parse_cidr(cidr)?;
        tracing::info!("clean routes within [{}] ...", network);
        table.delete_all_within(network).await?;
        tracing::info!("clean routes within [{}] finished", network);
        return Ok(());
    }

    let inventory = LocalNetworkInventory::discover(table.as_ref())
        .await
        .context("unable to get local network")?;
    let reconciler = Arc::new(RouteReconciler::new(Arc::new(inventory), table));

    let service = SyncService::new(
        reconciler.clone(),
        config.state_file.clone(),
        config.sync_interval,
        config.retry.clone(),
        config.teardown,
    );

    if let Some(addr) = config.status_addr {
        let state = Arc::new(AppState::new(reconciler.clone(), service.known_pools()));
        tokio::spawn(async move {
            if let Err(e) = api::rest::serve(addr, state).await {
                tracing::error!("Status API stopped: {}", e);
            }
        });
    }

    tracing::info!(
        "syncing routes from {} every {}s",
        config.state_file.display(),
        config.sync_interval.as_secs()
    );
    service.run(shutdown_signal()).await;

    tracing::info!("pod-route-sync stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
