use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::SharedState;

/// DELETE /api/limits/{identifier}
///
/// Administrative bucket reset. The next admission check for the
/// identifier recreates its bucket full, from the then-current policy.
pub async fn reset_limit(
    State(state): State<SharedState>,
    Path(identifier): Path<String>,
) -> impl IntoResponse {
    let identifier = identifier.trim().to_string();
    if identifier.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "identifier must not be empty" })),
        );
    }

    match state.buckets.reset(&identifier).await {
        Ok(()) => {
            tracing::info!(identifier = %identifier, "rate limit bucket reset");
            (
                StatusCode::OK,
                Json(json!({ "status": "deleted", "identifier": identifier })),
            )
        }
        Err(e) => {
            tracing::warn!(identifier = %identifier, error = %e, "bucket reset failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "rate limiter unavailable" })),
            )
        }
    }
}
