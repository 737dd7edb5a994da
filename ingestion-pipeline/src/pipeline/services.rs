use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::{
        config::AppConfig,
        embedding::{generate_embedding_batch_with_retry, EmbeddingBatch},
        llm::OpenAIClientType,
        summary_cache::{SummaryCache, SummaryStatus},
    },
};

use crate::{
    chunk::{chunk_text, ChunkDraft},
    extract::{extract_article, ExtractedArticle, ExtractionFlags},
    fetch::{FetchError, FetchedPage, PageFetcher},
    preprocess::{preprocess, PreprocessConfig, ProcessedText},
    summarize::generate_summary,
};

/// Seam between the orchestrator and its collaborators, mockable in tests.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError>;

    fn extract(&self, html: &str, url: &str) -> ExtractedArticle;

    fn preprocess_body(&self, text: &str, config: &PreprocessConfig) -> ProcessedText;

    /// Completed summary from the process-local cache, if fresh.
    fn cached_summary(&self, url: &str) -> Option<String>;

    async fn summarize(&self, text: &str) -> Result<String, AppError>;

    fn chunk(&self, text: &str) -> Vec<ChunkDraft>;

    async fn embed_batch(&self, inputs: &[String]) -> Result<EmbeddingBatch, AppError>;

    fn embedding_model(&self) -> &str;

    fn fetch_enabled(&self) -> bool;
}

pub struct DefaultPipelineServices {
    fetcher: PageFetcher,
    openai_client: Arc<OpenAIClientType>,
    config: AppConfig,
    summary_cache: Arc<SummaryCache>,
    extraction_flags: ExtractionFlags,
}

impl DefaultPipelineServices {
    pub fn new(
        openai_client: Arc<OpenAIClientType>,
        config: AppConfig,
        summary_cache: Arc<SummaryCache>,
    ) -> Result<Self, AppError> {
        let fetcher = PageFetcher::new()?;

        Ok(Self {
            fetcher,
            openai_client,
            config,
            summary_cache,
            extraction_flags: ExtractionFlags::default(),
        })
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.fetcher.fetch(url).await
    }

    fn extract(&self, html: &str, url: &str) -> ExtractedArticle {
        extract_article(html, url, &self.extraction_flags)
    }

    fn preprocess_body(&self, text: &str, config: &PreprocessConfig) -> ProcessedText {
        preprocess(text, config)
    }

    fn cached_summary(&self, url: &str) -> Option<String> {
        match self.summary_cache.get(url) {
            Some(entry) => match entry.status {
                SummaryStatus::Completed { summary } => Some(summary),
                _ => None,
            },
            None => None,
        }
    }

    async fn summarize(&self, text: &str) -> Result<String, AppError> {
        generate_summary(
            &self.openai_client,
            &self.config.chat_model,
            text,
            self.config.summary_max_tokens,
        )
        .await
    }

    fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        chunk_text(text)
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<EmbeddingBatch, AppError> {
        generate_embedding_batch_with_retry(
            &self.openai_client,
            inputs,
            &self.config.embedding_model,
        )
        .await
    }

    fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }

    fn fetch_enabled(&self) -> bool {
        self.config.fetch_page_content_enabled
    }
}
