use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use common::storage::types::{
    chat_memory::ChatMemory,
    chat_message::ChatMessage,
    chat_session::ChatSession,
};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

pub async fn create_session(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ChatSession>, ApiError> {
    let session = ChatSession::new(user.id);
    state
        .db
        .store_item(session.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("failed to store session: {e}")))?;

    Ok(Json(session))
}

#[derive(Deserialize)]
pub struct SessionListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    20
}

pub async fn list_sessions(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let sessions =
        ChatSession::list_for_user(&user.id, query.page, query.size, &state.db).await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ChatSession>, ApiError> {
    let session = ChatSession::get_active_owned(&id, &user.id, &state.db).await?;
    Ok(Json(session))
}

#[derive(Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

pub async fn update_session(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".to_string()));
    }
    ChatSession::patch_title(&id, &user.id, &body.title, &state.db).await?;
    Ok(Json(json!({ "success": true })))
}

/// DELETE soft-deactivates; the transcript stays for consolidation.
pub async fn delete_session(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ChatSession::deactivate(&id, &user.id, &state.db).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
}

pub async fn list_messages(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let _session = ChatSession::get_active_owned(&id, &user.id, &state.db).await?;
    let messages = ChatMessage::list_for_session(&id, query.limit, &state.db).await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct ContextQuery {
    pub limit_messages: Option<usize>,
}

/// Recent messages plus the active memories backing the next turn's prompt.
pub async fn session_context(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = ChatSession::get_active_owned(&id, &user.id, &state.db).await?;
    let messages =
        ChatMessage::list_for_session(&id, query.limit_messages.or(Some(20)), &state.db).await?;
    let memories = ChatMemory::top_for_session(&id, 5, &state.db).await?;

    Ok(Json(json!({
        "session": session,
        "messages": messages,
        "memories": memories,
    })))
}
