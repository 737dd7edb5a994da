#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    UserPreference,
    Fact,
    Context,
    Insight,
}

impl MemoryType {
    pub const ALL: [MemoryType; 4] = [
        MemoryType::UserPreference,
        MemoryType::Fact,
        MemoryType::Context,
        MemoryType::Insight,
    ];

    /// Bucket name inside the profile's memory document.
    pub fn bucket(self) -> &'static str {
        match self {
            MemoryType::UserPreference => "preferences",
            MemoryType::Fact => "facts",
            MemoryType::Context => "context",
            MemoryType::Insight => "insights",
        }
    }
}

stored_object!(ChatMemory, "chat_memory", {
    session_id: String,
    memory_type: MemoryType,
    content: String,
    importance_score: f32,
    is_active: bool,
    metadata: Option<serde_json::Value>
});

impl ChatMemory {
    pub fn new(
        session_id: String,
        memory_type: MemoryType,
        content: String,
        importance_score: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            memory_type,
            content,
            importance_score: importance_score.clamp(0.0, 1.0),
            is_active: true,
            metadata: None,
        }
    }

    /// Most important active memories for one session, used in the chat prompt.
    pub async fn top_for_session(
        session_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let memories: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chat_memory WHERE session_id = $session_id AND is_active = true
                 ORDER BY importance_score DESC LIMIT $limit",
            )
            .bind(("session_id", session_id.to_string()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(memories)
    }

    /// All active memories of one type across the user's sessions.
    pub async fn active_for_user_by_type(
        user_id: &str,
        memory_type: MemoryType,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let memories: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chat_memory WHERE memory_type = $memory_type AND is_active = true
                 AND session_id IN (SELECT VALUE record::id(id) FROM chat_session WHERE user_id = $user_id)
                 ORDER BY created_at ASC",
            )
            .bind(("memory_type", memory_type))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(memories)
    }

    pub async fn deactivate(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/is_active", false))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }
}
