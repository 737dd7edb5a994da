use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::chat_message::ChatMessage;

stored_object!(ChatSession, "chat_session", {
    user_id: String,
    title: Option<String>,
    is_active: bool,
    metadata: Option<serde_json::Value>
});

impl ChatSession {
    pub fn new(user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title: None,
            is_active: true,
            metadata: None,
        }
    }

    /// Loads a session and verifies the caller owns it and it is active.
    pub async fn get_active_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let session: Option<Self> = db.get_item(id).await?;
        let session =
            session.ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if session.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this session".to_string(),
            ));
        }
        if !session.is_active {
            return Err(AppError::NotFound("Session is no longer active".to_string()));
        }

        Ok(session)
    }

    pub async fn get_with_messages(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<ChatMessage>), AppError> {
        let session = Self::get_active_owned(id, user_id, db).await?;
        let messages = ChatMessage::list_for_session(id, None, db).await?;

        Ok((session, messages))
    }

    /// Derives the title from the first user message, capped at 40 chars.
    pub async fn derive_title(
        id: &str,
        first_message: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let title: String = first_message.chars().take(40).collect();

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", Some(title)))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Soft-deactivation; history is retained for memory consolidation.
    pub async fn deactivate(id: &str, user_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _session = Self::get_active_owned(id, user_id, db).await?;

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

    pub async fn patch_title(
        id: &str,
        user_id: &str,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _session = Self::get_active_owned(id, user_id, db).await?;

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", Some(new_title.to_string())))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn list_for_user(
        user_id: &str,
        page: usize,
        size: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let page = page.max(1);
        let size = size.clamp(1, 100);
        let start = (page - 1).saturating_mul(size);

        let sessions: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chat_session WHERE user_id = $user_id AND is_active = true
                 ORDER BY updated_at DESC LIMIT $limit START $start",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", size))
            .bind(("start", start))
            .await?
            .take(0)?;

        Ok(sessions)
    }

    pub async fn session_ids_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<String>, AppError> {
        let sessions: Vec<Self> = db
            .client
            .query("SELECT * FROM chat_session WHERE user_id = $user_id")
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(sessions.into_iter().map(|s| s.id).collect())
    }
}
