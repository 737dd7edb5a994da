use std::collections::HashSet;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::search::RagChunk;

/// The citation-indexed context block handed to the chat prompt, plus the
/// bookkeeping the engine persists as a retrieval trace.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagContext {
    pub context_text: String,
    pub chunks: Vec<RagChunk>,
    pub total_context_tokens: usize,
    pub keywords: Vec<String>,
}

impl RagContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Formats retrieved chunks into a token-budgeted context. Chunks are taken
/// in score order until the budget would be exceeded; a single over-budget
/// chunk is still included so retrieval is never silently empty.
pub fn build_context(chunks: &[RagChunk], token_budget: usize) -> RagContext {
    let mut context_text = String::new();
    let mut included = Vec::new();
    let mut total_tokens = 0_usize;

    for (i, chunk) in chunks.iter().enumerate() {
        if !included.is_empty() && total_tokens + chunk.estimated_tokens > token_budget {
            break;
        }

        let index = i + 1;
        let _ = write!(
            &mut context_text,
            "【{index} | {score:.2}】{text}\n来源标题: {title}\n来源链接: {url}\n",
            score = chunk.score,
            text = chunk.chunk_text,
            title = chunk.insight_title,
            url = chunk.insight_url,
        );
        if !chunk.insight_summary.is_empty() {
            let _ = writeln!(&mut context_text, "内容摘要: {}", chunk.insight_summary);
        }
        context_text.push('\n');

        total_tokens += chunk.estimated_tokens;
        included.push(chunk.clone());
    }

    let keywords = extract_keywords(&included);

    RagContext {
        context_text: context_text.trim_end().to_string(),
        chunks: included,
        total_context_tokens: total_tokens,
        keywords,
    }
}

/// Unique domain and title tokens, kept for audit logging.
fn extract_keywords(chunks: &[RagChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for chunk in chunks {
        if let Ok(url) = url::Url::parse(&chunk.insight_url) {
            if let Some(domain) = url.domain() {
                if seen.insert(domain.to_lowercase()) {
                    keywords.push(domain.to_lowercase());
                }
            }
        }
        for token in chunk
            .insight_title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 2)
        {
            let token = token.to_lowercase();
            if seen.insert(token.clone()) {
                keywords.push(token);
            }
        }
    }

    keywords
}
