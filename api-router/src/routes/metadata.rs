use axum::{
    extract::{Path, State},
    Form, Json,
};
use common::utils::summary_cache::{BeginOutcome, SummaryStatus};
use ingestion_pipeline::{
    extract::extract_article,
    preprocess::{preprocess, PreprocessConfig},
    summarize::generate_summary,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Deserialize)]
pub struct ExtractForm {
    pub url: String,
}

/// POST /metadata/extract: synchronously returns extracted metadata and
/// warms the summary cache in the background so a later insight creation
/// for the same URL skips its summary call.
pub async fn extract_metadata(
    State(state): State<ApiState>,
    Form(form): Form<ExtractForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = form.url.trim().to_string();
    if url.is_empty() {
        return Err(ApiError::Validation("url must not be empty".to_string()));
    }

    let page = state
        .fetcher
        .fetch(&url)
        .await
        .map_err(|e| ApiError::Validation(format!("Could not fetch URL: {e}")))?;

    let article = extract_article(&page.html, &url, &state.extraction_flags);

    // Cache warming runs decoupled from this response
    match state.summary_cache.begin(&url) {
        BeginOutcome::Started => {
            let cache = std::sync::Arc::clone(&state.summary_cache);
            let openai_client = std::sync::Arc::clone(&state.openai_client);
            let config = state.config.clone();
            let body = article.text.clone();
            let url_for_task = url.clone();

            tokio::spawn(async move {
                let processed = preprocess(&body, &PreprocessConfig::default());
                match generate_summary(
                    &openai_client,
                    &config.chat_model,
                    &processed.processed_text,
                    config.summary_max_tokens,
                )
                .await
                {
                    Ok(summary) => {
                        debug!(url = %url_for_task, "summary cache warmed");
                        cache.complete(&url_for_task, summary);
                    }
                    Err(err) => {
                        warn!(url = %url_for_task, error = %err, "summary warming failed");
                        cache.fail(&url_for_task, err.to_string());
                    }
                }
            });
        }
        BeginOutcome::AlreadyGenerating(_) | BeginOutcome::Cached(_) => {
            debug!(url, "summary generation already underway or cached");
        }
    }

    Ok(Json(json!({
        "url": url,
        "final_url": page.final_url,
        "title": article.title,
        "description": article.description,
        "image_url": article.image_url,
        "content_type": page.content_type,
    })))
}

/// GET /metadata/summary/{url}: cache status for a previously warmed URL.
pub async fn summary_status(
    State(state): State<ApiState>,
    Path(url): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.summary_cache.get(&url) {
        Some(entry) => match entry.status {
            SummaryStatus::Generating => Ok(Json(json!({ "status": "generating" }))),
            SummaryStatus::Completed { summary } => Ok(Json(json!({
                "status": "completed",
                "summary": summary,
            }))),
            SummaryStatus::Failed { error } => Ok(Json(json!({
                "status": "failed",
                "error": error,
            }))),
        },
        None => Err(ApiError::NotFound(
            "No summary has been requested for this URL".to_string(),
        )),
    }
}
