#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Queued,
    Sent,
    Failed,
}

stored_object!(EmailDigest, "email_digest", {
    user_id: String,
    week_start: String,
    status: DigestStatus,
    message_id: Option<String>,
    error: Option<String>,
    retry_count: u32,
    payload: Option<serde_json::Value>
});

impl EmailDigest {
    fn record_id(user_id: &str, week_start: &str) -> String {
        format!("{user_id}_{week_start}")
    }

    /// CAS insert of the audit row. Returns None when a row for
    /// (user, week_start) already exists, which is the idempotency signal
    /// the dispatcher keys off.
    pub async fn try_begin(
        user_id: &str,
        week_start: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let now = Utc::now();
        let digest = Self {
            id: Self::record_id(user_id, week_start),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            week_start: week_start.to_string(),
            status: DigestStatus::Queued,
            message_id: None,
            error: None,
            retry_count: 0,
            payload: None,
        };

        match db.store_item(digest.clone()).await {
            Ok(_) => Ok(Some(digest)),
            // The unique record id already exists; someone else got here first
            Err(_) => Ok(None),
        }
    }

    pub async fn get_for_week(
        user_id: &str,
        week_start: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(&Self::record_id(user_id, week_start)).await?)
    }

    pub async fn mark_sent(
        &self,
        message_id: &str,
        payload: serde_json::Value,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.clone()))
            .patch(PatchOp::replace("/status", DigestStatus::Sent))
            .patch(PatchOp::replace("/message_id", Some(message_id.to_string())))
            .patch(PatchOp::replace("/payload", Some(payload)))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn mark_failed(
        &self,
        error: &str,
        retry_count: u32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), self.id.clone()))
            .patch(PatchOp::replace("/status", DigestStatus::Failed))
            .patch(PatchOp::replace("/error", Some(error.to_string())))
            .patch(PatchOp::replace("/retry_count", retry_count))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }
}
