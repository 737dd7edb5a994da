use async_openai::types::CreateEmbeddingRequestArgs;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    storage::types::insight_chunk::EMBEDDING_DIM,
    utils::llm::{classify_openai_error, OpenAIClientType},
};

/// Upper bound on inputs per embeddings call.
pub const EMBEDDING_BATCH_SIZE: usize = 96;

/// Deadline for one embeddings call.
const EMBEDDING_BATCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Generates an embedding vector for the given input text.
///
/// # Errors
///
/// Returns an `AppError` when the API request fails or the response carries
/// no embedding data.
pub async fn generate_embedding(
    client: &OpenAIClientType,
    input: &str,
    model: &str,
) -> Result<Vec<f32>, AppError> {
    #[allow(clippy::cast_possible_truncation)]
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .dimensions(EMBEDDING_DIM as u32)
        .input([input])
        .build()?;

    let response = tokio::time::timeout(EMBEDDING_BATCH_TIMEOUT, client.embeddings().create(request))
        .await
        .map_err(|_| AppError::Upstream("Embedding call timed out".to_string()))??;

    let embedding: Vec<f32> = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
        .embedding
        .clone();

    Ok(embedding)
}

/// Result of a batch embedding call: vectors in input order plus the total
/// token count the provider billed for the batch.
#[derive(Debug)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Vec<f32>>,
    pub total_tokens: u32,
}

/// Embeds up to [`EMBEDDING_BATCH_SIZE`] inputs in one call.
pub async fn generate_embedding_batch(
    client: &OpenAIClientType,
    inputs: &[String],
    model: &str,
) -> Result<EmbeddingBatch, AppError> {
    if inputs.is_empty() {
        return Ok(EmbeddingBatch {
            embeddings: Vec::new(),
            total_tokens: 0,
        });
    }
    if inputs.len() > EMBEDDING_BATCH_SIZE {
        return Err(AppError::Validation(format!(
            "Embedding batch of {} exceeds the {EMBEDDING_BATCH_SIZE} input limit",
            inputs.len()
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .dimensions(EMBEDDING_DIM as u32)
        .input(inputs.to_vec())
        .build()?;

    let response = tokio::time::timeout(EMBEDDING_BATCH_TIMEOUT, client.embeddings().create(request))
        .await
        .map_err(|_| AppError::Upstream("Embedding call timed out".to_string()))??;

    let total_tokens = response.usage.total_tokens;

    // The API returns entries with an index field; order defensively by it
    let mut indexed: Vec<(u32, Vec<f32>)> = response
        .data
        .into_iter()
        .map(|d| (d.index, d.embedding))
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    let embeddings: Vec<Vec<f32>> = indexed.into_iter().map(|(_, e)| e).collect();

    if embeddings.len() != inputs.len() {
        return Err(AppError::LLMParsing(format!(
            "Embedding batch returned {} vectors for {} inputs",
            embeddings.len(),
            inputs.len()
        )));
    }

    debug!(
        inputs = inputs.len(),
        total_tokens, "embedding batch completed"
    );

    Ok(EmbeddingBatch {
        embeddings,
        total_tokens,
    })
}

/// Batch embedding with jittered exponential backoff on retryable upstream
/// failures (429 and 5xx classes plus deadline hits). Fatal classes surface
/// immediately.
pub async fn generate_embedding_batch_with_retry(
    client: &OpenAIClientType,
    inputs: &[String],
    model: &str,
) -> Result<EmbeddingBatch, AppError> {
    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

    RetryIf::spawn(
        retry_strategy,
        || generate_embedding_batch(client, inputs, model),
        |err: &AppError| {
            let retryable = match err {
                AppError::OpenAI(openai_err) => classify_openai_error(openai_err).is_retryable(),
                AppError::Upstream(_) => true,
                _ => false,
            };
            if retryable {
                warn!(error = %err, "retryable embedding failure, backing off");
            }
            retryable
        },
    )
    .await
}
