use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{api_state::ApiState, error::ApiError};

/// Ready when the database answers a trivial query.
pub async fn ready(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    state
        .db
        .client
        .query("RETURN 1")
        .await
        .map_err(|e| ApiError::Internal(format!("database not ready: {e}")))?;

    Ok(Json(json!({ "status": "ready" })))
}
