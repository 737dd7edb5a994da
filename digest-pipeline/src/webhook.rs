use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            email_event::{EmailEvent, EmailEventKind},
            email_preferences::EmailPreferences,
            email_suppression::EmailSuppression,
            profile::Profile,
            unsubscribe_token::UnsubscribeToken,
        },
    },
};
use serde::Deserialize;
use tracing::{info, warn};

/// Shape of the provider's webhook callback; unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct ProviderWebhookEvent {
    pub event: String,
    pub email: String,
    #[serde(rename = "message-id")]
    pub message_id: Option<String>,
}

/// Ingests one provider webhook: records the event and, for terminal
/// delivery failures, adds a suppression so the next dispatch skips the
/// address.
pub async fn process_webhook_event(
    db: &SurrealDbClient,
    event: ProviderWebhookEvent,
    raw_payload: serde_json::Value,
) -> Result<EmailEventKind, AppError> {
    let record = EmailEvent::new(
        event.email.clone(),
        &event.event,
        event.message_id,
        Some(raw_payload),
    );
    let kind = record.kind;
    db.store_item(record).await?;

    if kind.is_suppressing() {
        EmailSuppression::record(&event.email, &event.event, db).await?;
        info!(email = %event.email, event = %event.event, "suppression recorded from webhook");

        if kind == EmailEventKind::Unsubscribed {
            disable_digest_for_email(db, &event.email).await?;
        }
    }

    Ok(kind)
}

/// Visiting the unsubscribe link flips the preference and records a
/// suppression. The token is stable, so stale links keep working.
pub async fn handle_unsubscribe(
    db: &SurrealDbClient,
    token: &str,
) -> Result<String, AppError> {
    let resolved = UnsubscribeToken::resolve(token, db)
        .await?
        .ok_or_else(|| AppError::NotFound("Unknown unsubscribe token".to_string()))?;

    let mut preferences = EmailPreferences::get_or_default(&resolved.user_id, db).await?;
    preferences.weekly_digest_enabled = false;
    preferences.upsert(db).await?;

    if let Some(profile) = db.get_item::<Profile>(&resolved.user_id).await? {
        EmailSuppression::record(&profile.email, "unsubscribed", db).await?;
    }

    info!(user_id = %resolved.user_id, "weekly digest unsubscribed");
    Ok(resolved.user_id)
}

async fn disable_digest_for_email(db: &SurrealDbClient, email: &str) -> Result<(), AppError> {
    let profiles: Vec<Profile> = db
        .client
        .query("SELECT * FROM profile WHERE string::lowercase(email) = $email")
        .bind(("email", email.to_lowercase()))
        .await?
        .take(0)?;

    match profiles.first() {
        Some(profile) => {
            let mut preferences = EmailPreferences::get_or_default(&profile.id, db).await?;
            preferences.weekly_digest_enabled = false;
            preferences.upsert(db).await?;
        }
        None => {
            warn!(email, "unsubscribe webhook for unknown address");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("webhook_test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn bounce_event_creates_suppression() {
        let db = memory_db().await;

        let kind = process_webhook_event(
            &db,
            ProviderWebhookEvent {
                event: "hardBounce".to_string(),
                email: "User@Example.com".to_string(),
                message_id: Some("m1".to_string()),
            },
            serde_json::json!({"event": "hardBounce"}),
        )
        .await
        .expect("process");

        assert_eq!(kind, EmailEventKind::Bounced);
        assert!(EmailSuppression::is_suppressed("user@example.com", &db)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delivered_event_does_not_suppress() {
        let db = memory_db().await;

        process_webhook_event(
            &db,
            ProviderWebhookEvent {
                event: "delivered".to_string(),
                email: "user@example.com".to_string(),
                message_id: None,
            },
            serde_json::json!({}),
        )
        .await
        .expect("process");

        assert!(!EmailSuppression::is_suppressed("user@example.com", &db)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unsubscribe_webhook_disables_digest() {
        let db = memory_db().await;

        Profile::get_or_create("user1", "user@example.com", &db)
            .await
            .expect("profile");
        EmailPreferences::new("user1".to_string())
            .upsert(&db)
            .await
            .expect("preferences");

        process_webhook_event(
            &db,
            ProviderWebhookEvent {
                event: "unsubscribed".to_string(),
                email: "user@example.com".to_string(),
                message_id: None,
            },
            serde_json::json!({}),
        )
        .await
        .expect("process");

        let preferences = EmailPreferences::get_or_default("user1", &db)
            .await
            .expect("preferences");
        assert!(!preferences.weekly_digest_enabled);
    }

    #[tokio::test]
    async fn unsubscribe_link_flow() {
        let db = memory_db().await;

        Profile::get_or_create("user1", "user@example.com", &db)
            .await
            .expect("profile");
        let token = UnsubscribeToken::get_or_create("user1", "secret", &db)
            .await
            .expect("token");

        let user_id = handle_unsubscribe(&db, &token.token).await.expect("unsub");
        assert_eq!(user_id, "user1");

        let preferences = EmailPreferences::get_or_default("user1", &db)
            .await
            .expect("preferences");
        assert!(!preferences.weekly_digest_enabled);
        assert!(EmailSuppression::is_suppressed("user@example.com", &db)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let db = memory_db().await;
        let result = handle_unsubscribe(&db, "bogus").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
