use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Dimension of the dense embedding column; the HNSW index is defined with it.
pub const EMBEDDING_DIM: usize = 1536;

stored_object!(InsightChunk, "insight_chunk", {
    insight_id: String,
    user_id: String,
    chunk_index: usize,
    chunk_text: String,
    chunk_size: usize,
    estimated_tokens: usize,
    chunk_method: String,
    chunk_overlap: usize,
    embedding: Option<Vec<f32>>,
    embedding_model: Option<String>,
    embedding_tokens: Option<u32>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    embedding_generated_at: Option<DateTime<Utc>>
});

/// Search hit with the raw cosine score.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct InsightChunkSearchResult {
    pub chunk: InsightChunk,
    pub score: f32,
}

/// Per-insight embedding progress, exposed by the chunk summary endpoint.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ChunkEmbeddingSummary {
    pub total_chunks: usize,
    pub chunks_with_embedding: usize,
}

impl InsightChunk {
    pub fn new(insight_id: String, chunk_index: usize, chunk_text: String, chunk_overlap: usize) -> Self {
        let now = Utc::now();
        let chunk_size = chunk_text.chars().count();
        Self {
            // Record id derived from (insight, index) makes the uniqueness
            // invariant structural: a second insert of the same pair fails.
            id: format!("{insight_id}_{chunk_index}"),
            created_at: now,
            updated_at: now,
            user_id: String::new(),
            insight_id,
            chunk_index,
            chunk_text,
            chunk_size,
            estimated_tokens: estimate_tokens(chunk_size),
            chunk_method: "recursive".to_string(),
            chunk_overlap,
            embedding: None,
            embedding_model: None,
            embedding_tokens: None,
            embedding_generated_at: None,
        }
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>, model: &str, tokens: u32) -> Self {
        self.embedding = Some(embedding);
        self.embedding_model = Some(model.to_string());
        self.embedding_tokens = Some(tokens);
        self.embedding_generated_at = Some(Utc::now());
        self
    }

    pub async fn delete_by_insight_id(
        insight_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE insight_chunk WHERE insight_id = $insight_id")
            .bind(("insight_id", insight_id.to_string()))
            .await?;

        Ok(())
    }

    /// Stores a batch of chunks in a single transaction so a crash between
    /// batches never leaves half a batch behind.
    pub async fn store_batch(
        chunks: Vec<InsightChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut query = db.client.query("BEGIN TRANSACTION;");
        for (i, chunk) in chunks.into_iter().enumerate() {
            let id_key = format!("chunk_id_{i}");
            let content_key = format!("chunk_{i}");
            query = query
                .query(format!(
                    "CREATE type::thing('insight_chunk', ${id_key}) CONTENT ${content_key};"
                ))
                .bind((id_key, chunk.id.clone()))
                .bind((content_key, chunk));
        }
        let response = query.query("COMMIT TRANSACTION;").await?;
        response.check()?;

        Ok(())
    }

    pub async fn list_by_insight_id(
        insight_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM insight_chunk WHERE insight_id = $insight_id
                 ORDER BY chunk_index ASC",
            )
            .bind(("insight_id", insight_id.to_string()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    pub async fn embedding_summary(
        insight_id: &str,
        db: &SurrealDbClient,
    ) -> Result<ChunkEmbeddingSummary, AppError> {
        let chunks = Self::list_by_insight_id(insight_id, db).await?;
        let chunks_with_embedding = chunks.iter().filter(|c| c.embedding.is_some()).count();

        Ok(ChunkEmbeddingSummary {
            total_chunks: chunks.len(),
            chunks_with_embedding,
        })
    }

    /// Vector search over the user's chunks via the HNSW index. Chunks with a
    /// pending embedding are invisible by construction of the KNN operator.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
        user_id: &str,
    ) -> Result<Vec<InsightChunkSearchResult>, AppError> {
        if take == 0 {
            return Ok(Vec::new());
        }

        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            id: String,
            #[serde(deserialize_with = "deserialize_datetime")]
            created_at: DateTime<Utc>,
            #[serde(deserialize_with = "deserialize_datetime")]
            updated_at: DateTime<Utc>,
            insight_id: String,
            user_id: String,
            chunk_index: usize,
            chunk_text: String,
            chunk_size: usize,
            estimated_tokens: usize,
            chunk_method: String,
            chunk_overlap: usize,
            embedding: Option<Vec<f32>>,
            embedding_model: Option<String>,
            embedding_tokens: Option<u32>,
            #[serde(deserialize_with = "deserialize_option_datetime", default)]
            embedding_generated_at: Option<DateTime<Utc>>,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT
                *,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM insight_chunk
            WHERE user_id = $user_id
              AND embedding != NONE
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take};
            "#
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(|e| AppError::InternalError(format!("Surreal query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| InsightChunkSearchResult {
                chunk: InsightChunk {
                    id: r.id,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                    insight_id: r.insight_id,
                    user_id: r.user_id,
                    chunk_index: r.chunk_index,
                    chunk_text: r.chunk_text,
                    chunk_size: r.chunk_size,
                    estimated_tokens: r.estimated_tokens,
                    chunk_method: r.chunk_method,
                    chunk_overlap: r.chunk_overlap,
                    embedding: r.embedding,
                    embedding_model: r.embedding_model,
                    embedding_tokens: r.embedding_tokens,
                    embedding_generated_at: r.embedding_generated_at,
                },
                score: r.score,
            })
            .collect())
    }
}

/// Character-based token estimate for mixed-script content.
pub fn estimate_tokens(chunk_size: usize) -> usize {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let estimate = (chunk_size as f64 / 3.5).round() as usize;
    estimate.clamp(50, 2000)
}
