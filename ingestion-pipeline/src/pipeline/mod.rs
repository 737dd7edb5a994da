mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use context::IngestDegradation;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{sync::Arc, time::Instant};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingestion_job::IngestionJob},
    utils::{config::AppConfig, llm::OpenAIClientType, summary_cache::SummaryCache},
};
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{chunk_content, extract_content, fetch_page, persist_results, summarize_content},
    state::ready,
};

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<OpenAIClientType>,
        config: AppConfig,
        summary_cache: Arc<SummaryCache>,
    ) -> Result<Self, AppError> {
        Self::new_with_config(
            db,
            openai_client,
            config,
            summary_cache,
            IngestionConfig::default(),
        )
    }

    pub fn new_with_config(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<OpenAIClientType>,
        config: AppConfig,
        summary_cache: Arc<SummaryCache>,
        pipeline_config: IngestionConfig,
    ) -> Result<Self, AppError> {
        let services = DefaultPipelineServices::new(openai_client, config, summary_cache)?;

        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            pipeline_config,
            services,
        })
    }

    /// Runs the pipeline for a claimed job and settles the job status.
    /// Failures are isolated per insight; the job row records the outcome.
    #[tracing::instrument(
        skip_all,
        fields(
            job_id = %job.id,
            insight_id = %job.insight_id,
            user_id = %job.user_id
        )
    )]
    pub async fn process_job(&self, job: IngestionJob) -> Result<(), AppError> {
        let deadline = self.pipeline_config.tuning.pipeline_deadline;

        let outcome = tokio::time::timeout(deadline, self.drive_pipeline(&job)).await;

        match outcome {
            Ok(Ok(())) => {
                job.mark_completed(&self.db).await?;
                info!(job_id = %job.id, "ingestion job succeeded");
                Ok(())
            }
            Ok(Err(err)) => {
                let reason = err.to_string();
                job.mark_failed(&reason, &self.db).await?;
                warn!(job_id = %job.id, error = %reason, "ingestion job failed");
                Err(AppError::Processing(reason))
            }
            Err(_elapsed) => {
                // Deadline hit: partial state (insight row, possibly content)
                // is intentionally kept
                let reason = format!("pipeline deadline of {deadline:?} exceeded");
                job.mark_failed(&reason, &self.db).await?;
                warn!(job_id = %job.id, "ingestion job timed out");
                Err(AppError::Processing(reason))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id, user_id = %job.user_id))]
    async fn drive_pipeline(&self, job: &IngestionJob) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(
            job,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();
        let pipeline_started = Instant::now();

        let machine = fetch_page(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = extract_content(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = summarize_content(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = chunk_content(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let _machine = persist_results(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        debug!(
            job_id = %ctx.job_id,
            total_ms = u64::try_from(pipeline_started.elapsed().as_millis()).unwrap_or(u64::MAX),
            degraded = ctx.is_degraded(),
            "ingestion pipeline finished"
        );

        Ok(())
    }
}
