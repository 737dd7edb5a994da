#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    chat::{chat, health as chat_health},
    email::{
        brevo_webhook, cron_digest, get_preferences, test_send, unsubscribe, update_preferences,
    },
    insights::{
        chunk_summary, create_insight, delete_insight, get_insight, incremental_sync,
        list_all_insights, list_insights, update_insight,
    },
    liveness::live,
    memory::{auto_consolidate, consolidate, memory_profile, memory_summary, update_settings},
    metadata::{extract_metadata, summary_status},
    readiness::ready,
    sessions::{
        create_session, delete_session, get_session, list_messages, list_sessions,
        session_context, update_session,
    },
};

pub mod api_state;
pub mod error;
pub mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (probes, provider callbacks and the
    // secret-guarded cron trigger)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/chat/health", get(chat_health))
        .route("/email/cron/digest", post(cron_digest))
        .route("/email/webhooks/brevo", post(brevo_webhook))
        .route("/email/unsubscribe/{token}", get(unsubscribe));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/insights", post(create_insight).get(list_insights))
        .route("/insights/all", get(list_all_insights))
        .route("/insights/sync/incremental", get(incremental_sync))
        .route(
            "/insights/{id}",
            get(get_insight).put(update_insight).delete(delete_insight),
        )
        .route("/insights/{id}/chunks/summary", get(chunk_summary))
        .route("/metadata/extract", post(extract_metadata))
        .route("/metadata/summary/{*url}", get(summary_status))
        .route("/chat", post(chat))
        .route("/chat/sessions", post(create_session).get(list_sessions))
        .route(
            "/chat/sessions/{id}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/chat/sessions/{id}/messages", get(list_messages))
        .route("/chat/sessions/{id}/context", get(session_context))
        .route("/user/memory/consolidate", post(consolidate))
        .route("/user/memory/profile", get(memory_profile))
        .route("/user/memory/summary", get(memory_summary))
        .route("/user/memory/settings", put(update_settings))
        .route("/user/memory/auto-consolidate", post(auto_consolidate))
        .route(
            "/email/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route("/email/digest/test-send", post(test_send))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
