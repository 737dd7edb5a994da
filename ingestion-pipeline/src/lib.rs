#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunk;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod preprocess;
pub mod summarize;

use common::storage::{db::SurrealDbClient, types::ingestion_job::IngestionJob};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use uuid::Uuid;

/// Drains the ingestion job queue. Claims are conditional updates, so any
/// number of workers can run this loop concurrently.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let idle_backoff = Duration::from_millis(500);

    loop {
        match claim_next_job(&db).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(%worker_id, %job_id, "claimed ingestion job");
                if let Err(err) = ingestion_pipeline.process_job(job).await {
                    error!(%worker_id, %job_id, error = %err, "ingestion job failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim ingestion job, backing off");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn claim_next_job(
    db: &SurrealDbClient,
) -> Result<Option<IngestionJob>, common::error::AppError> {
    let candidates = IngestionJob::get_unfinished_jobs(db).await?;

    for candidate in candidates {
        if let Some(claimed) = candidate.try_claim(db).await? {
            return Ok(Some(claimed));
        }
    }

    Ok(None)
}
