use std::sync::Arc;

use chat_engine::ChatEngine;
use common::{
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, llm::OpenAIClientType, summary_cache::SummaryCache},
};
use digest_pipeline::DigestDispatcher;
use ingestion_pipeline::{extract::ExtractionFlags, fetch::PageFetcher};

use crate::middleware_api_auth::{build_verifier_chain, TokenVerifier};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub openai_client: Arc<OpenAIClientType>,
    pub chat_engine: Arc<ChatEngine>,
    pub summary_cache: Arc<SummaryCache>,
    pub dispatcher: Arc<DigestDispatcher>,
    pub fetcher: Arc<PageFetcher>,
    pub extraction_flags: ExtractionFlags,
    pub verifiers: Arc<Vec<Box<dyn TokenVerifier>>>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<OpenAIClientType>,
        summary_cache: Arc<SummaryCache>,
        config: AppConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let chat_engine = Arc::new(ChatEngine::new(
            Arc::clone(&db),
            Arc::clone(&openai_client),
            config.clone(),
        ));
        let dispatcher = Arc::new(DigestDispatcher::new(
            Arc::clone(&db),
            Arc::clone(&openai_client),
            config.clone(),
        )?);
        let fetcher = Arc::new(PageFetcher::new()?);
        let verifiers = Arc::new(build_verifier_chain(
            &db,
            config.auth_backend_url.as_deref(),
        ));

        Ok(Self {
            db,
            config,
            openai_client,
            chat_engine,
            summary_cache,
            dispatcher,
            fetcher,
            extraction_flags: ExtractionFlags::default(),
            verifiers,
        })
    }
}
