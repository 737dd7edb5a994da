use serde_json::{json, Value};

/// Role instruction for the assistant. The citation contract matches the
/// numbered blocks emitted by the context builder.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a personal knowledge assistant. \
You answer using the user's own saved notes when relevant context is provided. \
Cite every piece of context you rely on with its bracketed number, e.g. [1] or [2]. \
Never fabricate facts beyond the provided context; when the context does not cover \
the question, say so and answer from general knowledge, clearly marked as such.";

/// Appended when retrieval produced nothing.
pub const NO_CONTEXT_NOTE: &str = "No relevant prior notes were found for this question. \
Answer generally and note that no saved sources back the answer.";

/// System prompt for the post-turn memory extractor.
pub const MEMORY_EXTRACTION_SYSTEM_PROMPT: &str = "You extract durable facts about the user \
from a conversation excerpt. Return every stable preference, personal fact, situational \
context item, or insight worth remembering across sessions. Skip pleasantries and anything \
tied only to this one exchange. Score importance from 0 to 1.";

/// Strict schema for the extractor response.
pub fn memory_extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "memory_type": {
                            "type": "string",
                            "enum": ["user_preference", "fact", "context", "insight"]
                        },
                        "content": { "type": "string" },
                        "importance_score": { "type": "number" }
                    },
                    "required": ["memory_type", "content", "importance_score"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["memories"],
        "additionalProperties": false
    })
}
