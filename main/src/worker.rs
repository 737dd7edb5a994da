use std::{sync::Arc, time::Duration};

use common::{
    storage::db::SurrealDbClient,
    utils::{config::get_config, summary_cache::SummaryCache},
};
use ingestion_pipeline::{run_worker_loop, IngestionPipeline};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    // The worker keeps its own cache; entries are only reused within one
    // process, matching the cache's design
    let summary_cache = Arc::new(SummaryCache::new(Duration::from_secs(
        config.summary_cache_ttl_secs,
    )));

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        openai_client,
        config,
        summary_cache,
    )?);

    run_worker_loop(db, ingestion_pipeline).await
}
