use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use chat_engine::TurnRequest;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

#[derive(Deserialize)]
pub struct ChatQuery {
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
}

/// POST /chat: streams the turn as `data: {json}` SSE events. The session
/// id travels in the X-Session-ID header for both new and reused sessions.
pub async fn chat(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    Query(query): Query<ChatQuery>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let handle = state
        .chat_engine
        .start_turn(TurnRequest {
            user_id: user.id,
            session_id: query.session_id,
            message: body.message,
            client_key: connect_info.map(|Extension(ConnectInfo(addr))| addr.ip().to_string()),
        })
        .await?;

    let session_id = handle.session_id.clone();

    let sse_stream = handle.events.map(|event| {
        let payload = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","code":"internal","message":"serialization"}"#.to_string());
        Ok::<Event, std::convert::Infallible>(Event::default().data(payload))
    });

    let sse = Sse::new(sse_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    Ok(([("X-Session-ID", session_id)], sse).into_response())
}

/// GET /chat/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
