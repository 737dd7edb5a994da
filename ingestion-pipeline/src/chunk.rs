use common::storage::types::insight_chunk::estimate_tokens;
use text_splitter::{ChunkConfig, TextSplitter};

/// Target chunk size in characters, roughly 400 tokens.
pub const CHUNK_TARGET_CHARS: usize = 1200;
/// Hard cap: no chunk may exceed 1.25x the target.
pub const CHUNK_MAX_CHARS: usize = 1500;
/// Characters shared between adjacent chunks.
pub const CHUNK_OVERLAP_CHARS: usize = 200;
/// Method label persisted with every chunk row.
pub const CHUNK_METHOD: &str = "recursive";

/// One split unit before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub chunk_index: usize,
    pub chunk_text: String,
    pub chunk_size: usize,
    pub estimated_tokens: usize,
}

/// Token-aware recursive split with overlap. The splitter descends through
/// semantic boundaries (paragraph, line, sentence, word) and only splits
/// mid-word when a single boundary would blow the hard cap.
pub fn chunk_text(text: &str) -> Vec<ChunkDraft> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    #[allow(clippy::expect_used)]
    let config = ChunkConfig::new(CHUNK_TARGET_CHARS..CHUNK_MAX_CHARS)
        .with_overlap(CHUNK_OVERLAP_CHARS)
        .expect("overlap is below the chunk capacity");
    let splitter = TextSplitter::new(config);

    splitter
        .chunks(text)
        .enumerate()
        .map(|(chunk_index, chunk)| {
            let chunk_size = chunk.chars().count();
            ChunkDraft {
                chunk_index,
                chunk_text: chunk.to_string(),
                chunk_size,
                estimated_tokens: estimate_tokens(chunk_size),
            }
        })
        .collect()
}
