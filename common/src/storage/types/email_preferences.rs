#![allow(clippy::module_name_repetitions)]
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// What the dispatcher does for a user with no activity in the window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoActivityPolicy {
    Skip,
    Brief,
    Suggestions,
}

stored_object!(EmailPreferences, "email_preferences", {
    user_id: String,
    weekly_digest_enabled: bool,
    preferred_day: u8,
    preferred_hour: u8,
    timezone: String,
    no_activity_policy: NoActivityPolicy
});

impl EmailPreferences {
    pub fn new(user_id: String) -> Self {
        let now = Utc::now();
        Self {
            // 1:1 with the user
            id: user_id.clone(),
            created_at: now,
            updated_at: now,
            user_id,
            weekly_digest_enabled: true,
            preferred_day: 1, // Monday
            preferred_hour: 9,
            timezone: "UTC".to_string(),
            no_activity_policy: NoActivityPolicy::Skip,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.preferred_day > 6 {
            return Err(AppError::Validation(
                "preferred_day must be in 0..=6 (0 = Sunday)".to_string(),
            ));
        }
        if self.preferred_hour > 23 {
            return Err(AppError::Validation(
                "preferred_hour must be in 0..=23".to_string(),
            ));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(AppError::Validation(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        Ok(())
    }

    pub async fn get_or_default(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(preferences) = db.get_item::<Self>(user_id).await? {
            return Ok(preferences);
        }
        Ok(Self::new(user_id.to_string()))
    }

    pub async fn upsert(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        self.validate()?;

        let _stored: Option<Self> = db
            .client
            .upsert((Self::table_name(), self.id.clone()))
            .content(self.clone())
            .await?;

        Ok(())
    }

    pub async fn list_digest_enabled(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let preferences: Vec<Self> = db
            .client
            .query("SELECT * FROM email_preferences WHERE weekly_digest_enabled = true")
            .await?
            .take(0)?;

        Ok(preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut preferences = EmailPreferences::new("user1".into());
        assert!(preferences.validate().is_ok());

        preferences.preferred_day = 7;
        assert!(matches!(
            preferences.validate(),
            Err(AppError::Validation(_))
        ));

        preferences.preferred_day = 0;
        preferences.preferred_hour = 24;
        assert!(matches!(
            preferences.validate(),
            Err(AppError::Validation(_))
        ));

        preferences.preferred_hour = 22;
        preferences.timezone = "Mars/Olympus".into();
        assert!(matches!(
            preferences.validate(),
            Err(AppError::Validation(_))
        ));

        preferences.timezone = "Asia/Tokyo".into();
        assert!(preferences.validate().is_ok());
    }

    #[tokio::test]
    async fn test_get_or_default_returns_defaults_unstored() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let preferences = EmailPreferences::get_or_default("user1", &db)
            .await
            .expect("get");
        assert!(preferences.weekly_digest_enabled);
        assert_eq!(preferences.timezone, "UTC");

        // Defaults are not persisted until upsert
        let stored: Option<EmailPreferences> = db.get_item("user1").await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_upsert_round_trip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut preferences = EmailPreferences::new("user1".into());
        preferences.preferred_day = 2;
        preferences.preferred_hour = 22;
        preferences.timezone = "Asia/Tokyo".into();
        preferences.upsert(&db).await.expect("upsert");

        let fetched = EmailPreferences::get_or_default("user1", &db)
            .await
            .expect("get");
        assert_eq!(fetched.preferred_day, 2);
        assert_eq!(fetched.timezone, "Asia/Tokyo");

        preferences.weekly_digest_enabled = false;
        preferences.upsert(&db).await.expect("second upsert");

        let enabled = EmailPreferences::list_digest_enabled(&db).await.expect("list");
        assert!(enabled.is_empty());
    }
}
