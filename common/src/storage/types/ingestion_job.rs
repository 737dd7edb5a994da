use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IngestionJobStatus {
    Created,
    InProgress {
        attempts: u32,
        last_attempt: DateTime<Utc>,
    },
    Completed,
    Error(String),
    Cancelled,
}

stored_object!(IngestionJob, "ingestion_job", {
    insight_id: String,
    url: String,
    user_id: String,
    status: IngestionJobStatus
});

pub const MAX_ATTEMPTS: u32 = 3;

impl IngestionJob {
    pub fn new(insight_id: String, url: String, user_id: String) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            insight_id,
            url,
            user_id,
            status: IngestionJobStatus::Created,
        }
    }

    /// Creates a new job and stores it in the database
    pub async fn create_and_add_to_db(
        insight_id: String,
        url: String,
        user_id: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let job = Self::new(insight_id, url, user_id);
        db.store_item(job.clone()).await?;

        Ok(job)
    }

    // Update job status
    pub async fn update_status(
        id: &str,
        status: IngestionJobStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _job: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Attempts to claim the job for a worker. The conditional update only
    /// succeeds while the job is still claimable, so two workers racing on
    /// the same job see exactly one winner.
    pub async fn try_claim(&self, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let attempts = match &self.status {
            IngestionJobStatus::Created => 1,
            IngestionJobStatus::InProgress { attempts, .. } => attempts.saturating_add(1),
            IngestionJobStatus::Error(_) => return Ok(None),
            IngestionJobStatus::Completed | IngestionJobStatus::Cancelled => return Ok(None),
        };

        if attempts > MAX_ATTEMPTS {
            return Ok(None);
        }

        let claimed: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing('ingestion_job', $id)
                 SET status = $new_status, updated_at = time::now()
                 WHERE status = $expected_status
                 RETURN AFTER",
            )
            .bind(("id", self.id.clone()))
            .bind((
                "new_status",
                IngestionJobStatus::InProgress {
                    attempts,
                    last_attempt: Utc::now(),
                },
            ))
            .bind(("expected_status", self.status.clone()))
            .await?
            .take(0)?;

        Ok(claimed)
    }

    pub async fn mark_completed(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        Self::update_status(&self.id, IngestionJobStatus::Completed, db).await
    }

    /// Marks a failed attempt. The job stays claimable until MAX_ATTEMPTS is
    /// spent, after which it lands in the terminal Error state.
    pub async fn mark_failed(&self, reason: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let attempts = match &self.status {
            IngestionJobStatus::InProgress { attempts, .. } => *attempts,
            _ => MAX_ATTEMPTS,
        };

        let status = if attempts >= MAX_ATTEMPTS {
            IngestionJobStatus::Error(reason.to_string())
        } else {
            IngestionJobStatus::InProgress {
                attempts,
                last_attempt: Utc::now(),
            }
        };

        Self::update_status(&self.id, status, db).await
    }

    /// Get all unfinished jobs, ie newly created and in progress below the
    /// attempt ceiling
    pub async fn get_unfinished_jobs(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let jobs: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table)
             WHERE
                status = 'Created'
                OR (
                    status.InProgress != NONE
                    AND status.InProgress.attempts < $max_attempts
                )
             ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("max_attempts", MAX_ATTEMPTS))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_new_job_starts_created() {
        let job = IngestionJob::new("insight1".into(), "https://example.com".into(), "user1".into());

        assert_eq!(job.insight_id, "insight1");
        assert!(matches!(job.status, IngestionJobStatus::Created));
        assert!(!job.id.is_empty());
    }

    #[tokio::test]
    async fn test_try_claim_transitions_to_in_progress() {
        let db = memory_db().await;

        let job = IngestionJob::create_and_add_to_db(
            "insight1".into(),
            "https://example.com".into(),
            "user1".into(),
            &db,
        )
        .await
        .expect("create");

        let claimed = job.try_claim(&db).await.expect("claim").expect("claimable");
        match claimed.status {
            IngestionJobStatus::InProgress { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("Expected InProgress, got {other:?}"),
        }

        // A stale copy still holding Created must lose the race
        let second = job.try_claim(&db).await.expect("claim");
        assert!(second.is_none(), "stale claim must not succeed");
    }

    #[tokio::test]
    async fn test_completed_job_is_not_claimable() {
        let db = memory_db().await;

        let mut job = IngestionJob::new("i".into(), "https://example.com".into(), "u".into());
        job.status = IngestionJobStatus::Completed;
        db.store_item(job.clone()).await.expect("store");

        let claimed = job.try_claim(&db).await.expect("claim");
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_mark_failed_exhausts_into_error() {
        let db = memory_db().await;

        let mut job = IngestionJob::new("i".into(), "https://example.com".into(), "u".into());
        job.status = IngestionJobStatus::InProgress {
            attempts: MAX_ATTEMPTS,
            last_attempt: Utc::now(),
        };
        db.store_item(job.clone()).await.expect("store");

        job.mark_failed("fetch timed out", &db).await.expect("fail");

        let stored: IngestionJob = db.get_item(&job.id).await.unwrap().unwrap();
        assert!(matches!(stored.status, IngestionJobStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_get_unfinished_jobs_filters_status() {
        let db = memory_db().await;

        let created = IngestionJob::new("i1".into(), "https://example.com/1".into(), "u".into());

        let mut in_progress =
            IngestionJob::new("i2".into(), "https://example.com/2".into(), "u".into());
        in_progress.status = IngestionJobStatus::InProgress {
            attempts: 1,
            last_attempt: Utc::now(),
        };

        let mut exhausted =
            IngestionJob::new("i3".into(), "https://example.com/3".into(), "u".into());
        exhausted.status = IngestionJobStatus::InProgress {
            attempts: MAX_ATTEMPTS,
            last_attempt: Utc::now(),
        };

        let mut completed =
            IngestionJob::new("i4".into(), "https://example.com/4".into(), "u".into());
        completed.status = IngestionJobStatus::Completed;

        let mut errored = IngestionJob::new("i5".into(), "https://example.com/5".into(), "u".into());
        errored.status = IngestionJobStatus::Error("boom".into());

        for job in [created, in_progress, exhausted, completed, errored] {
            db.store_item(job).await.expect("store");
        }

        let unfinished = IngestionJob::get_unfinished_jobs(&db).await.expect("list");
        assert_eq!(unfinished.len(), 2);
    }
}
