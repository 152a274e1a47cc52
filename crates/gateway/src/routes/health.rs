use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /health
///
/// Returns gateway liveness plus the shared store's readiness as seen by
/// the health latch.
pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let store = if state.store.available() {
        "ready"
    } else {
        "unavailable"
    };

    Json(json!({
        "status": "healthy",
        "uptime_secs": uptime,
        "store": store,
        "version": env!("CARGO_PKG_VERSION")
    }))
}
