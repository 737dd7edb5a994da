use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingestion_job::IngestionJob},
};
use tracing::error;

use crate::{chunk::ChunkDraft, extract::ExtractedArticle, fetch::FetchedPage};

use super::{config::IngestionConfig, services::PipelineServices};

/// Why a pipeline run could not produce full content. None of these abort
/// the run; the insight is finalized from user-provided fields instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestDegradation {
    FetchFailed(String),
    NotHtml(String),
    ExtractionEmpty,
    SummaryFailed(String),
}

pub struct PipelineContext<'a> {
    pub job: &'a IngestionJob,
    pub job_id: String,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub fetched: Option<FetchedPage>,
    pub article: Option<ExtractedArticle>,
    pub processed_text: Option<String>,
    pub summary: Option<String>,
    pub summary_from_cache: bool,
    pub chunks: Vec<ChunkDraft>,
    pub degradation: Option<IngestDegradation>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        job: &'a IngestionJob,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let job_id = job.id.clone();
        Self {
            job,
            job_id,
            db,
            pipeline_config,
            services,
            fetched: None,
            article: None,
            processed_text: None,
            summary: None,
            summary_from_cache: false,
            chunks: Vec::new(),
            degradation: None,
        }
    }

    /// Records a degradation; the first one wins as the reported cause.
    pub fn degrade(&mut self, degradation: IngestDegradation) {
        if self.degradation.is_none() {
            self.degradation = Some(degradation);
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            job_id = %self.job_id,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
