use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::{
    ingestion_job::IngestionJob,
    insight::Insight,
    insight_chunk::InsightChunk,
    insight_content::InsightContent,
    insight_tag::InsightTag,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

#[derive(Deserialize)]
pub struct CreateInsightRequest {
    pub url: String,
    pub thought: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// POST /insights: writes the skeleton row synchronously and enqueues the
/// ingestion pipeline. The response carries tentative fields only.
pub async fn create_insight(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateInsightRequest>,
) -> Result<Json<Insight>, ApiError> {
    let parsed = url::Url::parse(&body.url)
        .map_err(|_| ApiError::Validation("Invalid URL".to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::Validation(
            "Only http and https URLs can be saved".to_string(),
        ));
    }

    let insight = Insight::new(user.id.clone(), body.url.clone(), body.thought)?;
    state.db.store_item(insight.clone()).await.map_err(|e| {
        tracing::error!("Failed to store insight: {e}");
        ApiError::Internal("Failed to store insight".to_string())
    })?;

    if !body.tag_ids.is_empty() {
        InsightTag::replace_for_insight(&insight.id, &body.tag_ids, &user.id, &state.db).await?;
    }

    IngestionJob::create_and_add_to_db(
        insight.id.clone(),
        insight.url.clone(),
        user.id.clone(),
        &state.db,
    )
    .await?;

    info!(insight_id = %insight.id, user_id = %user.id, "insight created, ingestion queued");

    Ok(Json(insight))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub search: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

pub async fn list_insights(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = Insight::list_page(
        &user.id,
        query.page,
        query.limit,
        query.search.as_deref(),
        &state.db,
    )
    .await?;

    Ok(Json(json!({
        "insights": page.insights,
        "pagination": {
            "page": page.page,
            "limit": page.limit,
            "total": page.total,
            "total_pages": page.total_pages,
        }
    })))
}

pub async fn list_all_insights(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Insight>>, ApiError> {
    Ok(Json(Insight::list_all(&user.id, &state.db).await?))
}

#[derive(Deserialize)]
pub struct IncrementalSyncQuery {
    pub since: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Incremental sync with ETag semantics: an unchanged corpus answers 200
/// with an empty array and the same ETag.
pub async fn incremental_sync(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<IncrementalSyncQuery>,
) -> Result<Response, ApiError> {
    let latest = Insight::latest_change(&user.id, &state.db).await?;
    let current_etag = latest.map_or_else(
        || "empty".to_string(),
        |instant| format!("\"{}\"", instant.timestamp_millis()),
    );

    let unchanged = query.etag.as_deref() == Some(current_etag.as_str());
    let insights = if unchanged {
        Vec::new()
    } else {
        let since = query.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
        Insight::list_changed_since(&user.id, since, &state.db).await?
    };

    let body = Json(json!({
        "insights": insights,
        "etag": current_etag,
    }));

    Ok(([(header::ETAG, current_etag.clone())], body).into_response())
}

pub async fn get_insight(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let insight = Insight::get_owned(&id, &user.id, &state.db).await?;
    let content = InsightContent::get_by_insight_id(&id, &state.db).await?;
    let tags = InsightTag::tags_for_insight(&id, &state.db).await?;

    Ok(Json(json!({
        "insight": insight,
        "summary": content.as_ref().map(|c| c.summary.clone()),
        "tags": tags,
    })))
}

#[derive(Deserialize)]
pub struct UpdateInsightRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thought: Option<String>,
    pub tag_ids: Option<Vec<String>>,
}

pub async fn update_insight(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<UpdateInsightRequest>,
) -> Result<Json<Insight>, ApiError> {
    let updated = Insight::patch(
        &id,
        &user.id,
        body.title,
        body.description,
        body.thought,
        &state.db,
    )
    .await?;

    if let Some(tag_ids) = body.tag_ids {
        InsightTag::replace_for_insight(&id, &tag_ids, &user.id, &state.db).await?;
    }

    Ok(Json(updated))
}

pub async fn delete_insight(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Insight::delete_cascading(&id, &user.id, &state.db).await?;
    Ok(Json(json!({ "success": true })))
}

/// Embedding progress for one insight's chunks.
pub async fn chunk_summary(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _insight = Insight::get_owned(&id, &user.id, &state.db).await?;
    let summary = InsightChunk::embedding_summary(&id, &state.db).await?;

    Ok(Json(json!({
        "insight_id": id,
        "total_chunks": summary.total_chunks,
        "chunks_with_embedding": summary.chunks_with_embedding,
    })))
}
