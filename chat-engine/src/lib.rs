#![allow(clippy::missing_docs_in_private_items)]

pub mod engine;
pub mod memory;
pub mod prompts;
pub mod rate_limit;
pub mod stream;

pub use engine::{ChatEngine, TurnHandle, TurnRequest};
pub use stream::{ChatStreamEvent, SourceRef};
