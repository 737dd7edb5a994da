use common::{
    error::AppError,
    utils::llm::{build_chat_request, create_completion, OpenAIClientType},
};
use tracing::debug;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize web articles for a personal knowledge base. \
Write a dense, factual summary of the supplied article text in at most three short paragraphs. \
Keep the article's own language. Do not add opinions, headers or bullet points.";

/// Caps the article text sent to the summarizer; the preprocessor usually
/// keeps us well below this.
const SUMMARY_INPUT_CHAR_LIMIT: usize = 24_000;

pub async fn generate_summary(
    client: &OpenAIClientType,
    model: &str,
    text: &str,
    max_tokens: u32,
) -> Result<String, AppError> {
    let input: String = text.chars().take(SUMMARY_INPUT_CHAR_LIMIT).collect();
    if input.trim().is_empty() {
        return Err(AppError::Validation(
            "Cannot summarize empty article text".to_string(),
        ));
    }

    let request = build_chat_request(model, SUMMARY_SYSTEM_PROMPT, input, Some(max_tokens))?;
    let (summary, usage) = create_completion(client, request).await?;

    debug!(
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "summary generated"
    );

    Ok(summary.trim().to_string())
}
