use std::{
    collections::HashSet,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    ChatCompletionStreamOptions, CreateChatCompletionRequestArgs,
};
use async_stream::stream;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chat_memory::ChatMemory,
            chat_message::{ChatMessage, MessageRole},
            chat_rag_context::{ChatRagContext, RagChunkRef},
            chat_session::ChatSession,
            profile::Profile,
        },
    },
    utils::{config::AppConfig, llm::OpenAIClientType},
};
use futures::{Stream, StreamExt};
use retrieval_pipeline::{build_context, RagContext, RetrievalConfig};
use tokio::sync::mpsc::channel;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    memory,
    prompts::{CHAT_SYSTEM_PROMPT, NO_CONTEXT_NOTE},
    rate_limit::ChatRateLimiter,
    stream::{ChatStreamEvent, SourceRef},
};

/// Messages of the prompt window.
const HISTORY_WINDOW: usize = 20;
/// Memories rendered into the system prompt.
const MEMORY_WINDOW: usize = 5;
/// Auto-consolidation cadence in messages per session.
const CONSOLIDATE_EVERY: usize = 10;

pub struct TurnRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    pub message: String,
    /// Fallback rate-limit key when the caller is only known by address.
    pub client_key: Option<String>,
}

pub struct TurnHandle {
    pub session_id: String,
    pub events: Pin<Box<dyn Stream<Item = ChatStreamEvent> + Send>>,
}

/// Releases the per-session serialization slot when the turn ends, whether
/// by completion or client disconnect.
struct SessionSlot {
    sessions: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        #[allow(clippy::unwrap_used)]
        self.sessions.lock().unwrap().remove(&self.id);
    }
}

enum StreamMsg {
    Delta(String),
    Done {
        usage: Option<common::utils::llm::TokenUsage>,
    },
}

struct PersistOutcome {
    request_id: String,
    latency_ms: u64,
}

pub struct ChatEngine {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<OpenAIClientType>,
    config: AppConfig,
    rate_limiter: ChatRateLimiter,
    active_sessions: Arc<Mutex<HashSet<String>>>,
}

impl ChatEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<OpenAIClientType>,
        config: AppConfig,
    ) -> Self {
        let rate_limiter = ChatRateLimiter::new(config.rate_limit_requests_per_minute);
        Self {
            db,
            openai_client,
            config,
            rate_limiter,
            active_sessions: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Runs one chat turn: session resolution, retrieval, prompt assembly
    /// and streaming generation. Returns before the first token; everything
    /// after flows through the event stream.
    pub async fn start_turn(&self, request: TurnRequest) -> Result<TurnHandle, AppError> {
        if request.message.trim().is_empty() {
            return Err(AppError::Validation("Message must not be empty".to_string()));
        }

        // Rate limit before any retrieval work
        let rate_key = if request.user_id.is_empty() {
            request.client_key.clone().unwrap_or_default()
        } else {
            request.user_id.clone()
        };
        if let Err(retry_after_secs) = self.rate_limiter.check(&rate_key) {
            return Err(AppError::RateLimited { retry_after_secs });
        }

        // Session lifecycle: reuse the caller's active session or create one
        let (session, is_new_session) = match &request.session_id {
            Some(id) => (
                ChatSession::get_active_owned(id, &request.user_id, &self.db).await?,
                false,
            ),
            None => {
                let session = ChatSession::new(request.user_id.clone());
                self.db.store_item(session.clone()).await?;
                (session, true)
            }
        };

        // One in-flight turn per session
        {
            #[allow(clippy::unwrap_used)]
            let mut active = self.active_sessions.lock().unwrap();
            if !active.insert(session.id.clone()) {
                return Err(AppError::Validation(
                    "A response is already being generated for this session".to_string(),
                ));
            }
        }
        let slot = SessionSlot {
            sessions: Arc::clone(&self.active_sessions),
            id: session.id.clone(),
        };

        let turn_started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let user_message = ChatMessage::new(
            session.id.clone(),
            MessageRole::User,
            request.message.clone(),
        );
        self.db.store_item(user_message.clone()).await?;

        // Retrieval degrades to an empty context, never fails the turn
        let retrieval = retrieval_pipeline::search(
            &self.db,
            &self.openai_client,
            &self.config.embedding_model,
            &request.message,
            &request.user_id,
            RetrievalConfig {
                k: self.config.rag_default_k,
                min_score: self.config.rag_default_min_score,
            },
        )
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "retrieval failed, continuing without context");
            Vec::new()
        });
        let context = build_context(&retrieval, self.config.rag_max_context_tokens);

        let memories = ChatMemory::top_for_session(&session.id, MEMORY_WINDOW, &self.db)
            .await
            .unwrap_or_default();

        let history =
            ChatMessage::list_for_session(&session.id, Some(HISTORY_WINDOW), &self.db).await?;

        let sources: Vec<SourceRef> = context
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| SourceRef {
                id: chunk.chunk_id.clone(),
                insight_id: chunk.insight_id.clone(),
                score: chunk.score,
                index: i + 1,
                title: chunk.insight_title.clone(),
                url: chunk.insight_url.clone(),
            })
            .collect();

        let openai_request = self.assemble_request(&context, &memories, &history)?;
        let openai_stream = self
            .openai_client
            .chat()
            .create_stream(openai_request)
            .await?;

        debug!(
            session_id = %session.id,
            request_id = %request_id,
            context_chunks = context.chunks.len(),
            context_tokens = context.total_context_tokens,
            "chat turn streaming started"
        );

        // Tee: raw deltas go to the collection task for persistence while
        // the event stream forwards them to the client
        let (tx, mut rx) = channel::<StreamMsg>(1000);
        let (tx_final, mut rx_final) = channel::<PersistOutcome>(1);

        self.spawn_collection_task(
            session.id.clone(),
            request.user_id.clone(),
            request.message.clone(),
            is_new_session,
            context.clone(),
            sources.clone(),
            request_id.clone(),
            turn_started,
            tx_final,
            async move {
                let mut answer = String::new();
                let mut usage = None;
                let mut completed = false;
                while let Some(message) = rx.recv().await {
                    match message {
                        StreamMsg::Delta(delta) => answer.push_str(&delta),
                        StreamMsg::Done { usage: u } => {
                            usage = u;
                            completed = true;
                        }
                    }
                }
                (answer, usage, completed)
            },
        );

        let session_id = session.id.clone();
        let request_id_for_stream = request_id;
        let sources_for_stream = sources;
        let mut openai_stream = openai_stream;

        let events = stream! {
            // Owns the serialization slot; released when this stream drops
            let _slot = slot;

            let mut usage = None;

            while let Some(result) = openai_stream.next().await {
                match result {
                    Ok(response) => {
                        if let Some(u) = &response.usage {
                            usage = Some(common::utils::llm::TokenUsage {
                                prompt_tokens: u.prompt_tokens,
                                completion_tokens: u.completion_tokens,
                            });
                        }

                        let content = response
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone())
                            .unwrap_or_default();

                        if !content.is_empty() {
                            let _ = tx.send(StreamMsg::Delta(content.clone())).await;
                            yield ChatStreamEvent::Content { content };
                        }
                    }
                    Err(err) => {
                        // Partial output is discarded: no Done marker is
                        // sent, so the collection task never persists
                        error!(error = %err, "upstream stream failed mid-generation");
                        yield ChatStreamEvent::Error {
                            code: "upstream_error".to_string(),
                            message: "Generation was interrupted".to_string(),
                        };
                        return;
                    }
                }
            }

            let _ = tx.send(StreamMsg::Done { usage }).await;
            drop(tx);

            match rx_final.recv().await {
                Some(outcome) => {
                    yield ChatStreamEvent::Done {
                        request_id: outcome.request_id,
                        latency_ms: outcome.latency_ms,
                        sources: sources_for_stream,
                    };
                }
                None => {
                    error!(request_id = %request_id_for_stream, "assistant persistence failed");
                    yield ChatStreamEvent::Error {
                        code: "internal".to_string(),
                        message: "Failed to persist the response".to_string(),
                    };
                }
            }
        };

        Ok(TurnHandle {
            session_id,
            events: events.boxed(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_collection_task<F>(
        &self,
        session_id: String,
        user_id: String,
        first_message: String,
        is_new_session: bool,
        context: RagContext,
        sources: Vec<SourceRef>,
        request_id: String,
        turn_started: Instant,
        tx_final: tokio::sync::mpsc::Sender<PersistOutcome>,
        collect: F,
    ) where
        F: std::future::Future<
                Output = (String, Option<common::utils::llm::TokenUsage>, bool),
            > + Send
            + 'static,
    {
        let db = Arc::clone(&self.db);
        let openai_client = Arc::clone(&self.openai_client);
        let chat_model = self.config.chat_model.clone();
        let rag_k = self.config.rag_default_k;
        let rag_min_score = self.config.rag_default_min_score;

        tokio::spawn(async move {
            let (answer, usage, completed) = collect.await;

            if !completed {
                // Client disconnected or the stream errored: discard
                debug!(session_id, "turn ended without completion, nothing persisted");
                return;
            }

            let latency_ms =
                u64::try_from(turn_started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let usage = usage.unwrap_or_default();
            let metadata = serde_json::json!({
                "model": chat_model,
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "latency_ms": latency_ms,
                "rag_k": rag_k,
                "sources": sources,
            });

            let assistant_message =
                ChatMessage::new(session_id.clone(), MessageRole::Assistant, answer)
                    .with_metadata(metadata);
            let message_id = assistant_message.id.clone();

            if let Err(err) = db.store_item(assistant_message).await {
                error!(session_id, error = %err, "failed to store assistant message");
                return;
            }

            let rag_chunks: Vec<RagChunkRef> = context
                .chunks
                .iter()
                .map(|chunk| RagChunkRef {
                    chunk_id: chunk.chunk_id.clone(),
                    insight_id: chunk.insight_id.clone(),
                    chunk_index: chunk.chunk_index,
                    score: chunk.score,
                })
                .collect();
            let trace = ChatRagContext::new(
                message_id,
                rag_chunks,
                context.context_text.clone(),
                context.total_context_tokens,
                context.keywords.clone(),
                rag_k,
                rag_min_score,
            );
            if let Err(err) = db.store_item(trace).await {
                error!(session_id, error = %err, "failed to store retrieval trace");
            }

            if is_new_session {
                if let Err(err) =
                    ChatSession::derive_title(&session_id, &first_message, &db).await
                {
                    warn!(session_id, error = %err, "failed to derive session title");
                }
            }

            info!(
                session_id,
                request_id,
                latency_ms,
                "assistant message persisted"
            );

            let _ = tx_final
                .send(PersistOutcome {
                    request_id: request_id.clone(),
                    latency_ms,
                })
                .await;

            // Memory extraction runs strictly after the assistant message
            // is durable; its failure never surfaces to the client
            match memory::extract_and_store_memories(&db, &openai_client, &chat_model, &session_id)
                .await
            {
                Ok(extracted) => debug!(session_id, extracted, "post-turn memory extraction done"),
                Err(err) => warn!(session_id, error = %err, "memory extraction failed"),
            }

            maybe_auto_consolidate(&db, &user_id, &session_id).await;
        });
    }

    fn assemble_request(
        &self,
        context: &RagContext,
        memories: &[ChatMemory],
        history: &[ChatMessage],
    ) -> Result<async_openai::types::CreateChatCompletionRequest, AppError> {
        let mut system_prompt = String::from(CHAT_SYSTEM_PROMPT);

        if !memories.is_empty() {
            system_prompt.push_str("\n\nKnown about this user:\n");
            for memory in memories {
                system_prompt.push_str("- ");
                system_prompt.push_str(&memory.content);
                system_prompt.push('\n');
            }
        }

        if context.is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(NO_CONTEXT_NOTE);
        } else {
            system_prompt.push_str("\n\nContext from the user's saved notes:\n");
            system_prompt.push_str(&context.context_text);
        }

        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessage::from(system_prompt).into()];

        for message in history {
            match message.role {
                MessageRole::User => messages.push(
                    ChatCompletionRequestUserMessage::from(message.content.clone()).into(),
                ),
                MessageRole::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.clone())
                        .build()?
                        .into(),
                ),
                MessageRole::System => messages.push(
                    ChatCompletionRequestSystemMessage::from(message.content.clone()).into(),
                ),
            }
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.chat_model)
            .messages(messages)
            .stream(true)
            .stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            })
            .build()?;

        Ok(request)
    }
}

/// Consolidates when the session crossed the cadence boundary and the user
/// opted in.
async fn maybe_auto_consolidate(db: &SurrealDbClient, user_id: &str, session_id: &str) {
    let message_count = match ChatMessage::list_for_session(session_id, None, db).await {
        Ok(messages) => messages.len(),
        Err(_) => return,
    };
    if message_count == 0 || message_count % CONSOLIDATE_EVERY != 0 {
        return;
    }

    let auto_enabled = match db.get_item::<Profile>(user_id).await {
        Ok(Some(profile)) => profile.memory_profile.consolidation_settings.auto_consolidate,
        _ => false,
    };
    if auto_enabled {
        memory::try_consolidate(db, user_id).await;
    }
}
