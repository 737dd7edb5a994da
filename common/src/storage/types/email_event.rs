#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailEventKind {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complaint,
    Unsubscribed,
    Other,
}

impl EmailEventKind {
    /// Events that must stop further sending to the address.
    pub fn is_suppressing(self) -> bool {
        matches!(
            self,
            EmailEventKind::Bounced | EmailEventKind::Complaint | EmailEventKind::Unsubscribed
        )
    }

    /// Maps the provider's webhook event string.
    pub fn from_provider(event: &str) -> Self {
        match event {
            "delivered" => EmailEventKind::Delivered,
            "opened" | "uniqueOpened" => EmailEventKind::Opened,
            "click" => EmailEventKind::Clicked,
            "hardBounce" | "softBounce" | "bounced" | "blocked" => EmailEventKind::Bounced,
            "spam" | "complaint" => EmailEventKind::Complaint,
            "unsubscribed" => EmailEventKind::Unsubscribed,
            _ => EmailEventKind::Other,
        }
    }
}

stored_object!(EmailEvent, "email_event", {
    email: String,
    kind: EmailEventKind,
    provider_event: String,
    message_id: Option<String>,
    payload: Option<serde_json::Value>
});

impl EmailEvent {
    pub fn new(
        email: String,
        provider_event: &str,
        message_id: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            email: email.to_lowercase(),
            kind: EmailEventKind::from_provider(provider_event),
            provider_event: provider_event.to_string(),
            message_id,
            payload,
        }
    }
}
