use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::admission::epoch_ms;
use crate::state::{DeploymentRecord, SharedState};

/// Request body for queueing a deployment.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub project: String,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<Value>,
}

/// POST /api/deployments
///
/// Queues a deployment record. This is a stub surface: persistence and
/// the build worker consume the queue elsewhere.
pub async fn create_deployment(
    State(state): State<SharedState>,
    Json(body): Json<CreateDeploymentRequest>,
) -> impl IntoResponse {
    if body.project.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "project must not be empty" })),
        );
    }

    let id = format!("{:016x}", rand::thread_rng().gen::<u64>());
    let record = DeploymentRecord {
        id: id.clone(),
        project: body.project.clone(),
        status: "queued".to_string(),
        created_at_ms: epoch_ms(),
    };

    state
        .deployments
        .write()
        .expect("deployments lock poisoned")
        .push(record);

    tracing::info!(deployment = %id, project = %body.project, "deployment queued");

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "id": id })),
    )
}

/// GET /api/deployments
///
/// Lists the deployments queued by this instance.
pub async fn list_deployments(State(state): State<SharedState>) -> Json<Value> {
    let deployments = state
        .deployments
        .read()
        .expect("deployments lock poisoned");

    Json(json!({ "deployments": &*deployments }))
}
