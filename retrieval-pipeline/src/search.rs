use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{insight::Insight, insight_chunk::InsightChunk},
    },
    utils::{embedding::generate_embedding, llm::OpenAIClientType},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One retrieval hit enriched with its parent insight's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagChunk {
    pub chunk_id: String,
    pub insight_id: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub chunk_size: usize,
    pub estimated_tokens: usize,
    pub score: f32,
    pub insight_title: String,
    pub insight_url: String,
    pub insight_summary: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub k: usize,
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 6,
            min_score: 0.2,
        }
    }
}

/// Embeds the query and searches the user's chunks. Fail-closed: any
/// embedding failure degrades to an empty result so chat can continue
/// with a no-context prompt.
pub async fn search(
    db: &SurrealDbClient,
    openai_client: &OpenAIClientType,
    embedding_model: &str,
    query: &str,
    user_id: &str,
    config: RetrievalConfig,
) -> Result<Vec<RagChunk>, AppError> {
    if config.k == 0 || config.min_score > 1.0 {
        return Ok(Vec::new());
    }

    let query_embedding = match generate_embedding(openai_client, query, embedding_model).await {
        Ok(embedding) => embedding,
        Err(err) => {
            warn!(error = %err, "query embedding failed, retrieval degrades to empty");
            return Ok(Vec::new());
        }
    };

    search_with_embedding(db, query_embedding, user_id, config).await
}

/// Cosine search + parent join for an already-computed query embedding.
pub async fn search_with_embedding(
    db: &SurrealDbClient,
    query_embedding: Vec<f32>,
    user_id: &str,
    config: RetrievalConfig,
) -> Result<Vec<RagChunk>, AppError> {
    if config.k == 0 || config.min_score > 1.0 {
        return Ok(Vec::new());
    }

    let hits = InsightChunk::vector_search(config.k, query_embedding, db, user_id).await?;

    // Join each chunk's parent insight for title/url/summary
    let mut parents: HashMap<String, (Insight, String)> = HashMap::new();
    let mut results = Vec::with_capacity(hits.len());

    for hit in hits {
        // Raw cosine in [0,1]; negative values clamp to 0
        let score = hit.score.max(0.0);
        if score < config.min_score {
            continue;
        }

        let insight_id = hit.chunk.insight_id.clone();
        if !parents.contains_key(&insight_id) {
            let Some(insight) = db.get_item::<Insight>(&insight_id).await? else {
                debug!(insight_id, "chunk without parent insight skipped");
                continue;
            };
            let summary = common::storage::types::insight_content::InsightContent::get_by_insight_id(
                &insight_id,
                db,
            )
            .await?
            .map(|content| content.summary)
            .unwrap_or_default();
            parents.insert(insight_id.clone(), (insight, summary));
        }

        let Some((insight, summary)) = parents.get(&insight_id) else {
            continue;
        };

        results.push(RagChunk {
            chunk_id: hit.chunk.id,
            insight_id,
            chunk_index: hit.chunk.chunk_index,
            chunk_text: hit.chunk.chunk_text,
            chunk_size: hit.chunk.chunk_size,
            estimated_tokens: hit.chunk.estimated_tokens,
            score,
            insight_title: insight.title.clone().unwrap_or_default(),
            insight_url: insight.url.clone(),
            insight_summary: summary.clone(),
        });
    }

    // Descending score, ties broken by (insight_id, chunk_index) ascending
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.insight_id.cmp(&b.insight_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });

    debug!(results = results.len(), "retrieval complete");

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("retrieval_test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.client
            .query("DEFINE INDEX idx_embedding_chunks ON insight_chunk FIELDS embedding HNSW DIMENSION 3")
            .await
            .expect("define index");
        db
    }

    async fn seed_insight(db: &SurrealDbClient, user_id: &str, title: &str) -> Insight {
        let mut insight = Insight::new(
            user_id.to_string(),
            format!("https://example.com/{}", title.replace(' ', "-")),
            None,
        )
        .expect("insight");
        insight.title = Some(title.to_string());
        db.store_item(insight.clone()).await.expect("store insight");
        insight
    }

    async fn seed_chunk(
        db: &SurrealDbClient,
        insight: &Insight,
        index: usize,
        text: &str,
        embedding: Vec<f32>,
    ) {
        let chunk = InsightChunk::new(insight.id.clone(), index, text.to_string(), 200)
            .with_user(&insight.user_id)
            .with_embedding(embedding, "text-embedding-3-small", 10);
        db.store_item(chunk).await.expect("store chunk");
    }

    #[tokio::test]
    async fn k_zero_returns_empty() {
        let db = memory_db().await;
        let results = search_with_embedding(
            &db,
            vec![1.0, 0.0, 0.0],
            "user1",
            RetrievalConfig { k: 0, min_score: 0.2 },
        )
        .await
        .expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn impossible_min_score_returns_empty() {
        let db = memory_db().await;
        let insight = seed_insight(&db, "user1", "a page").await;
        seed_chunk(&db, &insight, 0, "text", vec![1.0, 0.0, 0.0]).await;

        let results = search_with_embedding(
            &db,
            vec![1.0, 0.0, 0.0],
            "user1",
            RetrievalConfig { k: 5, min_score: 1.5 },
        )
        .await
        .expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn results_join_parent_metadata_and_order_by_score() {
        let db = memory_db().await;

        let close = seed_insight(&db, "user1", "close page").await;
        seed_chunk(&db, &close, 0, "about neural attention", vec![1.0, 0.0, 0.0]).await;

        let far = seed_insight(&db, "user1", "far page").await;
        seed_chunk(&db, &far, 0, "about cooking", vec![0.4, 0.9, 0.0]).await;

        let results = search_with_embedding(
            &db,
            vec![1.0, 0.0, 0.0],
            "user1",
            RetrievalConfig { k: 5, min_score: 0.0 },
        )
        .await
        .expect("search");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].insight_title, "close page");
        assert!(results[0].score >= results[1].score);
        assert!(results[0].insight_url.contains("close-page"));
    }

    #[tokio::test]
    async fn min_score_filters_low_hits() {
        let db = memory_db().await;

        let insight = seed_insight(&db, "user1", "page").await;
        seed_chunk(&db, &insight, 0, "on-topic", vec![1.0, 0.0, 0.0]).await;
        seed_chunk(&db, &insight, 1, "off-topic", vec![0.0, 1.0, 0.0]).await;

        let results = search_with_embedding(
            &db,
            vec![1.0, 0.0, 0.0],
            "user1",
            RetrievalConfig { k: 5, min_score: 0.5 },
        )
        .await
        .expect("search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_text, "on-topic");
    }

    #[tokio::test]
    async fn ties_break_on_insight_then_index() {
        let db = memory_db().await;

        let insight_b = seed_insight(&db, "user1", "bbb").await;
        let insight_a = seed_insight(&db, "user1", "aaa").await;

        // Identical embeddings: identical scores
        seed_chunk(&db, &insight_b, 1, "b1", vec![1.0, 0.0, 0.0]).await;
        seed_chunk(&db, &insight_b, 0, "b0", vec![1.0, 0.0, 0.0]).await;
        seed_chunk(&db, &insight_a, 0, "a0", vec![1.0, 0.0, 0.0]).await;

        let results = search_with_embedding(
            &db,
            vec![1.0, 0.0, 0.0],
            "user1",
            RetrievalConfig { k: 5, min_score: 0.0 },
        )
        .await
        .expect("search");

        assert_eq!(results.len(), 3);
        let keys: Vec<(String, usize)> = results
            .iter()
            .map(|r| (r.insight_id.clone(), r.chunk_index))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "equal scores order by (insight_id, chunk_index)");
    }

    #[tokio::test]
    async fn other_users_chunks_are_invisible() {
        let db = memory_db().await;

        let foreign = seed_insight(&db, "user2", "foreign").await;
        seed_chunk(&db, &foreign, 0, "not yours", vec![1.0, 0.0, 0.0]).await;

        let results = search_with_embedding(
            &db,
            vec![1.0, 0.0, 0.0],
            "user1",
            RetrievalConfig::default(),
        )
        .await
        .expect("search");

        assert!(results.is_empty());
    }
}
