use std::collections::HashSet;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chat_memory::{ChatMemory, MemoryType},
            chat_message::{format_history, ChatMessage},
            profile::{
                ConsolidatedMemory, ConsolidationSettings, ConsolidationStrategy, Profile,
            },
        },
    },
    utils::llm::{build_structured_request, create_completion, OpenAIClientType},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::prompts::{memory_extraction_schema, MEMORY_EXTRACTION_SYSTEM_PROMPT};

/// One extracted item from the LLM response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractedMemory {
    pub memory_type: MemoryType,
    pub content: String,
    pub importance_score: f32,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    memories: Vec<ExtractedMemory>,
}

/// Extracts durable memories from the last turns of a session and persists
/// them. Called asynchronously after the assistant message is stored;
/// failures are logged and never block the response.
pub async fn extract_and_store_memories(
    db: &SurrealDbClient,
    openai_client: &OpenAIClientType,
    model: &str,
    session_id: &str,
) -> Result<usize, AppError> {
    let history = ChatMessage::list_for_session(session_id, Some(10), db).await?;
    if history.is_empty() {
        return Ok(0);
    }

    let request = build_structured_request(
        model,
        MEMORY_EXTRACTION_SYSTEM_PROMPT,
        format_history(&history),
        "memory_extraction",
        memory_extraction_schema(),
    )?;

    let (content, _usage) = create_completion(openai_client, request).await?;
    let parsed: ExtractionResponse = serde_json::from_str(&content).map_err(|e| {
        AppError::LLMParsing(format!("Failed to parse memory extraction response: {e}"))
    })?;

    let count = parsed.memories.len();
    for extracted in parsed.memories {
        let memory = ChatMemory::new(
            session_id.to_string(),
            extracted.memory_type,
            extracted.content,
            extracted.importance_score,
        );
        db.store_item(memory).await?;
    }

    debug!(session_id, extracted = count, "memories extracted");
    Ok(count)
}

/// Jaccard similarity over lowercase word sets.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = tokenize_words(a);
    let words_b: HashSet<String> = tokenize_words(b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    #[allow(clippy::cast_precision_loss)]
    let similarity = intersection as f64 / union as f64;
    similarity
}

fn tokenize_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Merges two similar memory contents: the longer text wins, and any
/// sentence of the shorter one not already covered is appended.
pub fn merge_contents(a: &str, b: &str) -> String {
    let (longer, shorter) = if a.chars().count() >= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let longer_words = tokenize_words(longer);
    let mut merged = longer.trim_end_matches('.').to_string();

    for sentence in shorter.split('.') {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let sentence_words = tokenize_words(sentence);
        let covered = sentence_words.iter().all(|w| longer_words.contains(w));
        if !covered {
            merged.push_str(". ");
            merged.push_str(sentence);
        }
    }

    merged.push('.');
    merged
}

/// Outcome of merging one bucket.
#[derive(Debug)]
pub struct BucketMerge {
    pub consolidated: Vec<ConsolidatedMemory>,
    /// Ids of rows whose content is now subsumed by the profile document.
    pub subsumed_ids: Vec<String>,
}

/// Applies one consolidation strategy to a bucket of active memories.
pub fn merge_bucket(
    memories: &[ChatMemory],
    strategy: ConsolidationStrategy,
    threshold: f64,
    max_memories: usize,
) -> BucketMerge {
    match strategy {
        ConsolidationStrategy::Similarity => merge_by_similarity(memories, threshold, max_memories),
        ConsolidationStrategy::Importance => {
            let mut sorted: Vec<&ChatMemory> = memories.iter().collect();
            sorted.sort_by(|a, b| {
                b.importance_score
                    .partial_cmp(&a.importance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            keep_top(&sorted, memories, max_memories)
        }
        ConsolidationStrategy::Time => {
            let mut sorted: Vec<&ChatMemory> = memories.iter().collect();
            sorted.sort_by_key(|m| std::cmp::Reverse(m.created_at));
            keep_top(&sorted, memories, max_memories)
        }
    }
}

fn keep_top(sorted: &[&ChatMemory], all: &[ChatMemory], max_memories: usize) -> BucketMerge {
    let kept: Vec<&ChatMemory> = sorted.iter().copied().take(max_memories).collect();
    let kept_ids: HashSet<&str> = kept.iter().map(|m| m.id.as_str()).collect();

    BucketMerge {
        consolidated: kept
            .iter()
            .map(|m| ConsolidatedMemory {
                content: m.content.clone(),
                importance_score: m.importance_score,
                source_count: 1,
            })
            .collect(),
        subsumed_ids: all
            .iter()
            .filter(|m| !kept_ids.contains(m.id.as_str()))
            .map(|m| m.id.clone())
            .collect(),
    }
}

fn merge_by_similarity(
    memories: &[ChatMemory],
    threshold: f64,
    max_memories: usize,
) -> BucketMerge {
    let mut groups: Vec<(ConsolidatedMemory, Vec<String>)> = Vec::new();

    for memory in memories {
        let mut merged_into = false;
        for (group, member_ids) in &mut groups {
            if text_similarity(&group.content, &memory.content) > threshold {
                group.content = merge_contents(&group.content, &memory.content);
                group.importance_score = group.importance_score.max(memory.importance_score);
                group.source_count += 1;
                member_ids.push(memory.id.clone());
                merged_into = true;
                break;
            }
        }
        if !merged_into {
            groups.push((
                ConsolidatedMemory {
                    content: memory.content.clone(),
                    importance_score: memory.importance_score,
                    source_count: 1,
                },
                vec![memory.id.clone()],
            ));
        }
    }

    // Rows folded into a group of more than one entry are subsumed by
    // the consolidated content
    let mut subsumed_ids = Vec::new();
    for (group, member_ids) in &groups {
        if group.source_count > 1 {
            subsumed_ids.extend(member_ids.iter().cloned());
        }
    }

    let mut consolidated: Vec<ConsolidatedMemory> =
        groups.into_iter().map(|(group, _)| group).collect();
    consolidated.sort_by(|a, b| {
        b.importance_score
            .partial_cmp(&a.importance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    consolidated.truncate(max_memories);

    BucketMerge {
        consolidated,
        subsumed_ids,
    }
}

/// Summary of a consolidation run, returned by the memory endpoint.
#[derive(Debug, serde::Serialize)]
pub struct ConsolidationReport {
    pub consolidated_counts: Vec<(String, usize)>,
    pub deactivated: usize,
}

/// Merges the user's active memories into the profile document per bucket,
/// deactivating rows the document now subsumes.
pub async fn consolidate_user_memories(
    db: &SurrealDbClient,
    user_id: &str,
    memory_types: &[MemoryType],
    strategy_override: Option<ConsolidationStrategy>,
) -> Result<ConsolidationReport, AppError> {
    let profile: Profile = db
        .get_item(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?;

    let settings: ConsolidationSettings = profile.memory_profile.consolidation_settings.clone();
    let strategy = strategy_override.unwrap_or(settings.consolidation_strategy);

    let mut memory_profile = profile.memory_profile.clone();
    let mut consolidated_counts = Vec::new();
    let mut deactivated = 0_usize;

    for memory_type in memory_types {
        let memories = ChatMemory::active_for_user_by_type(user_id, *memory_type, db).await?;
        if memories.is_empty() {
            continue;
        }

        let merge = merge_bucket(
            &memories,
            strategy,
            f64::from(settings.consolidation_threshold),
            settings.max_memories_per_type,
        );

        consolidated_counts.push((memory_type.bucket().to_string(), merge.consolidated.len()));
        *memory_profile.bucket_mut(*memory_type) = merge.consolidated;

        for id in &merge.subsumed_ids {
            ChatMemory::deactivate(id, db).await?;
            deactivated += 1;
        }
    }

    memory_profile.last_consolidated = Some(Utc::now());
    memory_profile.version = memory_profile.version.max(1);
    Profile::update_memory_profile(user_id, memory_profile, db).await?;

    info!(
        user_id,
        deactivated,
        strategy = ?strategy,
        "memory consolidation complete"
    );

    Ok(ConsolidationReport {
        consolidated_counts,
        deactivated,
    })
}

/// Fire-and-forget variant used after chat turns; errors only logged.
pub async fn try_consolidate(db: &SurrealDbClient, user_id: &str) {
    if let Err(err) =
        consolidate_user_memories(db, user_id, &MemoryType::ALL, None).await
    {
        warn!(user_id, error = %err, "automatic memory consolidation failed");
    }
}
