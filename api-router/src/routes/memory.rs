use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chat_engine::memory::{consolidate_user_memories, extract_and_store_memories};
use common::storage::types::{
    chat_memory::{ChatMemory, MemoryType},
    profile::{ConsolidationSettings, ConsolidationStrategy, Profile},
};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

#[derive(Deserialize)]
pub struct ConsolidateRequest {
    pub memory_types: Option<Vec<MemoryType>>,
    #[serde(default)]
    pub force_consolidate: bool,
    pub consolidation_strategy: Option<ConsolidationStrategy>,
}

/// POST /user/memory/consolidate
pub async fn consolidate(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ConsolidateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Ensure a profile exists so first-time consolidation works
    let profile = Profile::get_or_create(&user.id, &user.email, &state.db).await?;
    if !body.force_consolidate && !profile.memory_profile.consolidation_settings.auto_consolidate
    {
        return Err(ApiError::Validation(
            "Consolidation is disabled for this profile; pass force_consolidate".to_string(),
        ));
    }

    let memory_types = body
        .memory_types
        .unwrap_or_else(|| MemoryType::ALL.to_vec());

    let report = consolidate_user_memories(
        &state.db,
        &user.id,
        &memory_types,
        body.consolidation_strategy,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "consolidated": report.consolidated_counts,
        "deactivated": report.deactivated,
    })))
}

/// GET /user/memory/profile
pub async fn memory_profile(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = Profile::get_or_create(&user.id, &user.email, &state.db).await?;
    Ok(Json(json!({ "memory_profile": profile.memory_profile })))
}

/// GET /user/memory/summary: per-type counts plus consolidation freshness.
pub async fn memory_summary(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = Profile::get_or_create(&user.id, &user.email, &state.db).await?;

    let mut counts = serde_json::Map::new();
    for memory_type in MemoryType::ALL {
        let active = ChatMemory::active_for_user_by_type(&user.id, memory_type, &state.db).await?;
        counts.insert(
            memory_type.bucket().to_string(),
            json!({
                "active": active.len(),
                "consolidated": profile.memory_profile.bucket(memory_type).len(),
            }),
        );
    }

    Ok(Json(json!({
        "buckets": counts,
        "last_consolidated": profile.memory_profile.last_consolidated,
    })))
}

/// PUT /user/memory/settings
pub async fn update_settings(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Json(settings): Json<ConsolidationSettings>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !(0.0..=1.0).contains(&settings.consolidation_threshold) {
        return Err(ApiError::Validation(
            "consolidation_threshold must be within [0, 1]".to_string(),
        ));
    }
    if settings.max_memories_per_type == 0 {
        return Err(ApiError::Validation(
            "max_memories_per_type must be positive".to_string(),
        ));
    }

    Profile::get_or_create(&user.id, &user.email, &state.db).await?;
    Profile::update_consolidation_settings(&user.id, settings, &state.db).await?;

    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct AutoConsolidateQuery {
    pub session_id: Option<String>,
}

/// POST /user/memory/auto-consolidate: extraction (when a session is named)
/// followed by a consolidation pass.
pub async fn auto_consolidate(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AutoConsolidateQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Profile::get_or_create(&user.id, &user.email, &state.db).await?;

    let mut extracted = 0_usize;
    if let Some(session_id) = &query.session_id {
        let _session = common::storage::types::chat_session::ChatSession::get_active_owned(
            session_id, &user.id, &state.db,
        )
        .await?;
        extracted = extract_and_store_memories(
            &state.db,
            &state.openai_client,
            &state.config.chat_model,
            session_id,
        )
        .await?;
    }

    let report =
        consolidate_user_memories(&state.db, &user.id, &MemoryType::ALL, None).await?;

    Ok(Json(json!({
        "success": true,
        "extracted": extracted,
        "deactivated": report.deactivated,
    })))
}
