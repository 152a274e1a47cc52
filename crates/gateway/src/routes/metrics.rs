use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::TextEncoder;

use crate::state::SharedState;

/// GET /metrics
///
/// Prometheus text exposition of the admission counters. The store health
/// latch is exported as `gateway_store_ready` so dashboards can correlate
/// denied or passed-through admissions with store outages.
pub async fn get_metrics(State(state): State<SharedState>) -> Response {
    // Point-in-time reading of the latch, refreshed on every scrape.
    state
        .metrics
        .store_ready
        .set(i64::from(state.store.available()));

    let mut body = String::new();
    match TextEncoder::new().encode_utf8(&state.metrics.registry.gather(), &mut body) {
        Ok(()) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode prometheus metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
