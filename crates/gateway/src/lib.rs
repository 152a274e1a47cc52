pub mod admission;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::state::SharedState;

pub use state::{AppState, DeploymentRecord, GatewayMetrics, SharedState as SharedStateType};

/// Build the Axum router: the admission-gated API surface plus the
/// ungated health, metrics, and administrative routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let gated = Router::new()
        .route(
            "/api/deployments",
            get(routes::deployments::list_deployments).post(routes::deployments::create_deployment),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission::admission,
        ));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::get_metrics))
        .route("/api/limits/{identifier}", delete(routes::limits::reset_limit))
        .merge(gated)
        .with_state(state)
        .layer(cors)
}

/// Start the gateway server on the specified address.
///
/// This function will block until the server is shut down.
pub async fn run_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("gateway listening on {}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Convenience function to create a SharedState.
pub fn new_shared_state(
    config: slipway_common::AppConfig,
    store: Arc<dyn slipway_store::KeyValueStore>,
) -> SharedState {
    Arc::new(AppState::new(config, store))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
