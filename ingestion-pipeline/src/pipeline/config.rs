use std::time::Duration;

use crate::preprocess::PreprocessConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    /// Top-level deadline for one insight's pipeline run.
    pub pipeline_deadline: Duration,
    pub embedding_batch_size: usize,
    /// Additional retry passes over batches whose embedding call failed.
    pub embedding_retry_passes: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            pipeline_deadline: Duration::from_secs(5 * 60),
            embedding_batch_size: common::utils::embedding::EMBEDDING_BATCH_SIZE,
            embedding_retry_passes: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub preprocess: PreprocessConfig,
}
