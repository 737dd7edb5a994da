use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::Utc;
use common::storage::types::email_preferences::EmailPreferences;
use digest_pipeline::webhook::{handle_unsubscribe, process_webhook_event, ProviderWebhookEvent};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

/// POST /email/cron/digest: hourly fan-out guarded by the shared secret.
pub async fn cron_digest(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let supplied = headers
        .get("X-Cron-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let expected = state
        .config
        .cron_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal("cron secret not configured".to_string()))?;
    if supplied != expected {
        return Err(ApiError::Unauthorized("Invalid cron secret".to_string()));
    }

    let summary = state.dispatcher.run_cron(Utc::now(), false).await;

    Ok(Json(json!({
        "evaluated": summary.evaluated,
        "sent": summary.sent,
        "decisions": summary.decisions,
    })))
}

#[derive(Deserialize)]
pub struct TestSendRequest {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    pub email_override: Option<String>,
}

/// POST /email/digest/test-send (owner-authed)
pub async fn test_send(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<TestSendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state
        .dispatcher
        .test_send(&user.id, body.dry_run, body.force, body.email_override)
        .await?;

    Ok(Json(json!({
        "decision": outcome.decision,
        "sent": outcome.sent,
        "skipped_reason": outcome.skipped_reason,
    })))
}

/// GET /email/preferences
pub async fn get_preferences(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<EmailPreferences>, ApiError> {
    let preferences = EmailPreferences::get_or_default(&user.id, &state.db).await?;
    Ok(Json(preferences))
}

#[derive(Deserialize)]
pub struct UpdatePreferencesRequest {
    pub weekly_digest_enabled: Option<bool>,
    pub preferred_day: Option<u8>,
    pub preferred_hour: Option<u8>,
    pub timezone: Option<String>,
    pub no_activity_policy:
        Option<common::storage::types::email_preferences::NoActivityPolicy>,
}

/// PUT /email/preferences
pub async fn update_preferences(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdatePreferencesRequest>,
) -> Result<Json<EmailPreferences>, ApiError> {
    let mut preferences = EmailPreferences::get_or_default(&user.id, &state.db).await?;

    if let Some(enabled) = body.weekly_digest_enabled {
        preferences.weekly_digest_enabled = enabled;
    }
    if let Some(day) = body.preferred_day {
        preferences.preferred_day = day;
    }
    if let Some(hour) = body.preferred_hour {
        preferences.preferred_hour = hour;
    }
    if let Some(timezone) = body.timezone {
        preferences.timezone = timezone;
    }
    if let Some(policy) = body.no_activity_policy {
        preferences.no_activity_policy = policy;
    }

    preferences.upsert(&state.db).await?;

    Ok(Json(preferences))
}

/// POST /email/webhooks/brevo: provider callbacks; unknown shapes are
/// acknowledged so the provider stops retrying them.
pub async fn brevo_webhook(
    State(state): State<ApiState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match serde_json::from_value::<ProviderWebhookEvent>(payload.clone()) {
        Ok(event) => {
            let kind = process_webhook_event(&state.db, event, payload).await?;
            Ok(Json(json!({ "success": true, "kind": format!("{kind:?}") })))
        }
        Err(err) => {
            warn!(error = %err, "unparseable provider webhook acknowledged");
            Ok(Json(json!({ "success": true, "kind": "ignored" })))
        }
    }
}

/// GET /email/unsubscribe/{token}
pub async fn unsubscribe(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = handle_unsubscribe(&state.db, &token).await?;
    Ok(Json(json!({
        "success": true,
        "user_id": user_id,
        "message": "Weekly digest disabled",
    })))
}
