use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            insight::Insight,
            insight_chunk::InsightChunk,
            insight_content::InsightContent,
        },
    },
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use crate::chunk::{ChunkDraft, CHUNK_OVERLAP_CHARS};

use super::{
    context::{IngestDegradation, PipelineContext},
    state::{Chunked, Extracted, Fetched, IngestionMachine, Persisted, Ready, Summarized},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, user_id = %ctx.job.user_id)
)]
pub async fn fetch_page(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Fetched>, AppError> {
    if !ctx.services.fetch_enabled() {
        debug!(job_id = %ctx.job_id, "page fetch disabled by configuration");
        ctx.degrade(IngestDegradation::FetchFailed(
            "page fetch disabled".to_string(),
        ));
        return machine
            .fetch()
            .map_err(|(_, guard)| map_guard_error("fetch", &guard));
    }

    match ctx.services.fetch_page(&ctx.job.url).await {
        Ok(page) => {
            debug!(
                job_id = %ctx.job_id,
                final_url = %page.final_url,
                content_type = %page.content_type,
                "page fetched"
            );
            ctx.fetched = Some(page);
        }
        Err(err) => {
            warn!(job_id = %ctx.job_id, url = %ctx.job.url, error = %err, "page fetch degraded");
            ctx.degrade(match &err {
                crate::fetch::FetchError::NotHtml(kind) => IngestDegradation::NotHtml(kind.clone()),
                other => IngestDegradation::FetchFailed(other.to_string()),
            });
        }
    }

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, user_id = %ctx.job.user_id)
)]
pub async fn extract_content(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    if let Some(fetched) = &ctx.fetched {
        let article = ctx.services.extract(&fetched.html, &ctx.job.url);
        if article.text.trim().is_empty() {
            warn!(job_id = %ctx.job_id, "extraction produced no body text");
            ctx.degrade(IngestDegradation::ExtractionEmpty);
        }

        debug!(
            job_id = %ctx.job_id,
            title = %article.title,
            text_chars = article.text.chars().count(),
            "article extracted"
        );
        ctx.article = Some(article);
    }

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, user_id = %ctx.job.user_id)
)]
pub async fn summarize_content(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Summarized>, AppError> {
    let body = ctx
        .article
        .as_ref()
        .map(|article| article.text.clone())
        .unwrap_or_default();

    if body.trim().is_empty() {
        return machine
            .summarize()
            .map_err(|(_, guard)| map_guard_error("summarize", &guard));
    }

    let processed = ctx
        .services
        .preprocess_body(&body, &ctx.pipeline_config.preprocess);
    debug!(
        job_id = %ctx.job_id,
        compression_ratio = processed.compression_ratio,
        paragraphs = processed.paragraph_count,
        "body preprocessed"
    );
    ctx.processed_text = Some(processed.processed_text.clone());

    // A cache hit from the metadata-preview endpoint saves the summary call
    if let Some(cached) = ctx.services.cached_summary(&ctx.job.url) {
        debug!(job_id = %ctx.job_id, "summary served from cache");
        ctx.summary = Some(cached);
        ctx.summary_from_cache = true;
    } else {
        match ctx.services.summarize(&processed.processed_text).await {
            Ok(summary) => ctx.summary = Some(summary),
            Err(err) => {
                warn!(job_id = %ctx.job_id, error = %err, "summary generation degraded");
                ctx.degrade(IngestDegradation::SummaryFailed(err.to_string()));
            }
        }
    }

    machine
        .summarize()
        .map_err(|(_, guard)| map_guard_error("summarize", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, user_id = %ctx.job.user_id)
)]
pub async fn chunk_content(
    machine: IngestionMachine<(), Summarized>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    if let Some(processed) = &ctx.processed_text {
        ctx.chunks = ctx.services.chunk(processed);
        debug!(job_id = %ctx.job_id, chunks = ctx.chunks.len(), "body chunked");
    }

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, user_id = %ctx.job.user_id)
)]
pub async fn persist_results(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let insight_id = &ctx.job.insight_id;

    // Re-running the pipeline for the same insight starts from a clean slate
    InsightChunk::delete_by_insight_id(insight_id, ctx.db).await?;

    if ctx.processed_text.is_some() || ctx.summary.is_some() {
        let thought = ctx
            .db
            .get_item::<Insight>(insight_id)
            .await?
            .and_then(|insight| insight.thought);

        let article = ctx.article.clone().unwrap_or_default();
        let content = InsightContent::new(
            insight_id.clone(),
            ctx.job.user_id.clone(),
            ctx.job.url.clone(),
            ctx.processed_text.clone().unwrap_or_default(),
            article.markdown,
            ctx.summary.clone().unwrap_or_default(),
            ctx.fetched.as_ref().map(|f| f.html.clone()),
            thought,
            ctx.fetched
                .as_ref()
                .map_or_else(|| "text/html".to_string(), |f| f.content_type.clone()),
        );
        content.upsert(ctx.db).await?;
    }

    let persisted_chunks = store_chunks_with_embeddings(ctx).await?;

    // Finalize insight metadata; user-provided fields win inside the helper
    if let Some(article) = &ctx.article {
        Insight::apply_extracted_metadata(
            insight_id,
            non_empty(&article.title),
            non_empty(&article.description),
            non_empty(&article.image_url),
            ctx.db,
        )
        .await?;
    }

    match &ctx.degradation {
        Some(degradation) => {
            // Partial ingest is logged, never raised
            info!(
                job_id = %ctx.job_id,
                insight_id = %insight_id,
                degradation = ?degradation,
                persisted_chunks,
                "partial ingest completed"
            );
        }
        None => {
            info!(
                job_id = %ctx.job_id,
                insight_id = %insight_id,
                persisted_chunks,
                summary_from_cache = ctx.summary_from_cache,
                "ingest completed"
            );
        }
    }

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

/// Embeds chunk drafts in batches, persisting each batch as it completes so
/// a failure preserves prior progress. Batches that still fail after the
/// retry pass are stored without an embedding and stay invisible to search.
async fn store_chunks_with_embeddings(ctx: &mut PipelineContext<'_>) -> Result<usize, AppError> {
    let drafts = std::mem::take(&mut ctx.chunks);
    if drafts.is_empty() {
        return Ok(0);
    }

    let batch_size = ctx.pipeline_config.tuning.embedding_batch_size.max(1);
    let model = ctx.services.embedding_model().to_string();

    let mut failed_batches: Vec<Vec<ChunkDraft>> = Vec::new();
    let mut persisted = 0_usize;

    for batch in drafts.chunks(batch_size) {
        match embed_and_store(ctx, batch, &model).await {
            Ok(count) => persisted += count,
            Err(err) => {
                warn!(
                    job_id = %ctx.job_id,
                    error = %err,
                    batch_len = batch.len(),
                    "embedding batch failed, queued for retry pass"
                );
                failed_batches.push(batch.to_vec());
            }
        }
    }

    for _ in 0..ctx.pipeline_config.tuning.embedding_retry_passes {
        if failed_batches.is_empty() {
            break;
        }
        let retrying = std::mem::take(&mut failed_batches);
        for batch in retrying {
            match embed_and_store(ctx, &batch, &model).await {
                Ok(count) => persisted += count,
                Err(err) => {
                    warn!(job_id = %ctx.job_id, error = %err, "embedding retry pass failed");
                    failed_batches.push(batch);
                }
            }
        }
    }

    // Whatever could not be embedded is persisted with a pending embedding
    for batch in failed_batches {
        let rows: Vec<InsightChunk> = batch
            .iter()
            .map(|draft| draft_to_chunk(ctx, draft))
            .collect();
        persisted += rows.len();
        InsightChunk::store_batch(rows, ctx.db).await?;
    }

    Ok(persisted)
}

async fn embed_and_store(
    ctx: &PipelineContext<'_>,
    batch: &[ChunkDraft],
    model: &str,
) -> Result<usize, AppError> {
    let inputs: Vec<String> = batch.iter().map(|d| d.chunk_text.clone()).collect();
    let embedded = ctx.services.embed_batch(&inputs).await?;

    #[allow(clippy::cast_possible_truncation)]
    let per_chunk_tokens = if batch.is_empty() {
        0
    } else {
        embedded.total_tokens / batch.len() as u32
    };

    let rows: Vec<InsightChunk> = batch
        .iter()
        .zip(embedded.embeddings)
        .map(|(draft, embedding)| {
            draft_to_chunk(ctx, draft).with_embedding(embedding, model, per_chunk_tokens)
        })
        .collect();

    let count = rows.len();
    InsightChunk::store_batch(rows, ctx.db).await?;

    debug!(
        job_id = %ctx.job_id,
        batch_len = count,
        total_tokens = embedded.total_tokens,
        "chunk batch embedded and persisted"
    );

    Ok(count)
}

fn draft_to_chunk(ctx: &PipelineContext<'_>, draft: &ChunkDraft) -> InsightChunk {
    let mut chunk = InsightChunk::new(
        ctx.job.insight_id.clone(),
        draft.chunk_index,
        draft.chunk_text.clone(),
        CHUNK_OVERLAP_CHARS,
    )
    .with_user(&ctx.job.user_id);
    chunk.chunk_size = draft.chunk_size;
    chunk.estimated_tokens = draft.estimated_tokens;
    chunk.created_at = Utc::now();
    chunk.updated_at = chunk.created_at;
    chunk
}
