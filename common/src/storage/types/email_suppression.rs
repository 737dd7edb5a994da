#![allow(clippy::module_name_repetitions)]
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EmailSuppression, "email_suppression", {
    email: String,
    reason: String
});

impl EmailSuppression {
    /// Records a suppression for an address. Keyed by the lowercased address
    /// so repeated events collapse into one row.
    pub async fn record(
        email: &str,
        reason: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let email = email.to_lowercase();
        let now = Utc::now();
        let suppression = Self {
            id: email.clone(),
            created_at: now,
            updated_at: now,
            email,
            reason: reason.to_string(),
        };

        let _stored: Option<Self> = db
            .client
            .upsert((Self::table_name(), suppression.id.clone()))
            .content(suppression)
            .await?;

        Ok(())
    }

    pub async fn is_suppressed(email: &str, db: &SurrealDbClient) -> Result<bool, AppError> {
        let found: Option<Self> = db.get_item(&email.to_lowercase()).await?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_record_and_check_case_insensitive() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        assert!(!EmailSuppression::is_suppressed("user@example.com", &db)
            .await
            .unwrap());

        EmailSuppression::record("User@Example.com", "bounced", &db)
            .await
            .expect("record");

        assert!(EmailSuppression::is_suppressed("user@example.com", &db)
            .await
            .unwrap());
        assert!(EmailSuppression::is_suppressed("USER@EXAMPLE.COM", &db)
            .await
            .unwrap());

        // Re-recording with a new reason must not fail
        EmailSuppression::record("user@example.com", "complaint", &db)
            .await
            .expect("re-record");
    }
}
