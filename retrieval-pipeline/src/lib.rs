#![allow(clippy::missing_docs_in_private_items)]

pub mod context;
pub mod search;

pub use context::{build_context, RagContext};
pub use search::{search, search_with_embedding, RagChunk, RetrievalConfig};
