use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// One retrieved chunk reference inside a persisted retrieval trace.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RagChunkRef {
    pub chunk_id: String,
    pub insight_id: String,
    pub chunk_index: usize,
    pub score: f32,
}

stored_object!(ChatRagContext, "chat_rag_context", {
    message_id: String,
    rag_chunks: Vec<RagChunkRef>,
    context_text: String,
    total_context_tokens: usize,
    extracted_keywords: Vec<String>,
    rag_k: usize,
    rag_min_score: f32
});

impl ChatRagContext {
    pub fn new(
        message_id: String,
        rag_chunks: Vec<RagChunkRef>,
        context_text: String,
        total_context_tokens: usize,
        extracted_keywords: Vec<String>,
        rag_k: usize,
        rag_min_score: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            // Keyed by the assistant message, enforcing at most one trace per message
            id: message_id.clone(),
            created_at: now,
            updated_at: now,
            message_id,
            rag_chunks,
            context_text,
            total_context_tokens,
            extracted_keywords,
            rag_k,
            rag_min_score,
        }
    }

    pub async fn get_for_message(
        message_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(message_id).await?)
    }
}
