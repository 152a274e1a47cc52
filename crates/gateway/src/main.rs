use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use slipway_common::AppConfig;
use slipway_gateway::new_shared_state;
use slipway_store::RedisStore;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/slipway.yaml".to_string());

    info!(config_path = %config_path, "starting slipway gateway");

    let config = AppConfig::load(&config_path)?;

    let store = Arc::new(RedisStore::connect(&config.store).await?);
    store.start_health_task(Duration::from_secs(config.store.health_interval_secs));

    let state = new_shared_state(config.clone(), store);

    slipway_gateway::run_server(state, &config.server.listen).await
}
