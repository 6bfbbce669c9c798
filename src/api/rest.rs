// REST API endpoints

use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use ipnet::Ipv4Net;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use super::{ErrorResponse, RouteStatus};
use crate::error::RouteResult;
use crate::reconciler::RouteReconciler;
use crate::routes::inventory::LocalNetworkInventory;

#[derive(Clone)]
pub struct AppState {
    reconciler: Arc<RouteReconciler>,
    pools: Arc<RwLock<Vec<Ipv4Net>>>,
    hostname: String,
}

impl AppState {
    pub fn new(reconciler: Arc<RouteReconciler>, pools: Arc<RwLock<Vec<Ipv4Net>>>) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        AppState {
            reconciler,
            pools,
            hostname,
        }
    }

    /// Managed routes inside the pools of the last sync pass
    pub async fn route_status(&self) -> RouteResult<RouteStatus> {
        let pools = self.pools.read().await.clone();
        let routes = self.reconciler.managed_routes(&pools).await?;
        Ok(RouteStatus {
            hostname: self.hostname.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            pools,
            routes,
        })
    }
}

pub fn create_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/local-networks", get(get_local_networks))
        .route("/api/routes", get(get_routes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status API until the process exits
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status API listening on http://{}", addr);
    tracing::info!("  GET  http://{}/api/routes", addr);
    tracing::info!("  GET  http://{}/api/local-networks", addr);
    axum::serve(listener, create_api_router(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_local_networks(State(state): State<Arc<AppState>>) -> Json<LocalNetworkInventory> {
    Json(state.reconciler.inventory().clone())
}

async fn get_routes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RouteStatus>, (StatusCode, Json<ErrorResponse>)> {
    match state.route_status().await {
        Ok(status) => Ok(Json(status)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "FailedToListRoutes".to_string(),
                message: e.to_string(),
            }),
        )),
    }
}
