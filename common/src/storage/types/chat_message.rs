#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

stored_object!(ChatMessage, "chat_message", {
    session_id: String,
    role: MessageRole,
    content: String,
    metadata: Option<serde_json::Value>,
    parent_message_id: Option<String>
});

impl ChatMessage {
    pub fn new(session_id: String, role: MessageRole, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            role,
            content,
            metadata: None,
            parent_message_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Messages of a session in creation order, optionally capped to the
    /// most recent `limit` (order is preserved after capping).
    pub async fn list_for_session(
        session_id: &str,
        limit: Option<usize>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut messages: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chat_message WHERE session_id = $session_id
                 ORDER BY created_at ASC",
            )
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        if let Some(limit) = limit {
            let skip = messages.len().saturating_sub(limit);
            messages.drain(..skip);
        }

        Ok(messages)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// helper function to format a slice of messages for prompt assembly
pub fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_creation() {
        let message = ChatMessage::new(
            "session1".to_string(),
            MessageRole::User,
            "This is a test message".to_string(),
        );

        assert_eq!(message.session_id, "session1");
        assert_eq!(message.role, MessageRole::User);
        assert_eq!(message.content, "This is a test message");
        assert!(message.metadata.is_none());
        assert!(!message.id.is_empty());
    }

    #[tokio::test]
    async fn test_list_for_session_orders_and_limits() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let base = Utc::now();
        for i in 0..5 {
            let mut message = ChatMessage::new(
                "session1".to_string(),
                if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                format!("message {i}"),
            );
            message.created_at = base + chrono::Duration::seconds(i);
            message.updated_at = message.created_at;
            db.store_item(message).await.expect("store");
        }

        let all = ChatMessage::list_for_session("session1", None, &db)
            .await
            .expect("list");
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "message 0");
        assert_eq!(all[4].content, "message 4");

        let recent = ChatMessage::list_for_session("session1", Some(2), &db)
            .await
            .expect("list limited");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "message 3");
        assert_eq!(recent[1].content, "message 4");
    }

    #[tokio::test]
    async fn test_format_history() {
        let messages = vec![
            ChatMessage::new("s".into(), MessageRole::User, "Hello".into()),
            ChatMessage::new("s".into(), MessageRole::Assistant, "Hi there!".into()),
        ];

        assert_eq!(format_history(&messages), "User: Hello\nAssistant: Hi there!");
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let message = ChatMessage::new("s".into(), MessageRole::Assistant, "answer".into())
            .with_metadata(serde_json::json!({
                "model": "gpt-4o-mini",
                "prompt_tokens": 120,
                "completion_tokens": 80,
                "latency_ms": 900,
            }));

        db.store_item(message.clone()).await.expect("store");

        let fetched: ChatMessage = db.get_item(&message.id).await.unwrap().unwrap();
        let metadata = fetched.metadata.expect("metadata present");
        assert_eq!(metadata["model"], "gpt-4o-mini");
        assert_eq!(metadata["completion_tokens"], 80);
    }
}
