use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub type OpenAIClientType = Client<OpenAIConfig>;

/// Classification of upstream LLM failures. Callers branch on
/// `is_retryable` to decide between backoff and surfacing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    AuthError,
    RateLimited,
    UpstreamTimeout,
    UpstreamServerError,
    BadRequest,
    ContextOverflow,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited
                | LlmErrorKind::UpstreamTimeout
                | LlmErrorKind::UpstreamServerError
        )
    }
}

fn classify_api_error(err: &ApiError) -> LlmErrorKind {
    let code = err.code.as_deref().unwrap_or_default();
    let kind = err.r#type.as_deref().unwrap_or_default();

    if code == "context_length_exceeded" || err.message.contains("maximum context length") {
        return LlmErrorKind::ContextOverflow;
    }
    if code == "rate_limit_exceeded" || kind == "rate_limit_error" {
        return LlmErrorKind::RateLimited;
    }
    if code == "invalid_api_key" || kind == "authentication_error" {
        return LlmErrorKind::AuthError;
    }
    if kind == "server_error" || kind == "internal_error" {
        return LlmErrorKind::UpstreamServerError;
    }

    LlmErrorKind::BadRequest
}

/// Maps an async-openai error onto the retry taxonomy.
pub fn classify_openai_error(err: &OpenAIError) -> LlmErrorKind {
    match err {
        OpenAIError::ApiError(api) => classify_api_error(api),
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                LlmErrorKind::UpstreamTimeout
            } else {
                LlmErrorKind::UpstreamServerError
            }
        }
        OpenAIError::JSONDeserialize(_) => LlmErrorKind::UpstreamServerError,
        _ => LlmErrorKind::BadRequest,
    }
}

/// Prompt + completion token counts surfaced as message metadata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

pub fn build_chat_request(
    model: &str,
    system_prompt: &str,
    user_message: String,
    max_tokens: Option<u32>,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model).messages([
        ChatCompletionRequestSystemMessage::from(system_prompt.to_string()).into(),
        ChatCompletionRequestUserMessage::from(user_message).into(),
    ]);
    if let Some(max_tokens) = max_tokens {
        args.max_completion_tokens(max_tokens);
    }
    args.build()
}

/// Request with a strict JSON-schema response format, used where the reply
/// must parse into a typed struct (memory extraction, digest narrative).
pub fn build_structured_request(
    model: &str,
    system_prompt: &str,
    user_message: String,
    schema_name: &str,
    schema: serde_json::Value,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: None,
            name: schema_name.into(),
            schema: Some(schema),
            strict: Some(true),
        },
    };

    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(system_prompt.to_string()).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()
}

/// Deadline for one non-streaming completion call.
const COMPLETION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Runs a non-streaming completion and returns the content plus usage.
pub async fn create_completion(
    client: &OpenAIClientType,
    request: CreateChatCompletionRequest,
) -> Result<(String, TokenUsage), AppError> {
    let response = tokio::time::timeout(COMPLETION_TIMEOUT, client.chat().create(request))
        .await
        .map_err(|_| AppError::Upstream("Completion call timed out".to_string()))??;

    let usage = response
        .usage
        .as_ref()
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))?;

    Ok((content, usage))
}
