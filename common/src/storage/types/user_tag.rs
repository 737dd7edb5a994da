use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(UserTag, "user_tag", {
    user_id: String,
    name: String,
    color: String
});

impl UserTag {
    pub fn new(user_id: String, name: String, color: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            name,
            color,
        }
    }

    pub async fn get_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let tag: Option<Self> = db.get_item(id).await?;
        let tag = tag.ok_or_else(|| AppError::NotFound("Tag not found".to_string()))?;

        if tag.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this tag".to_string(),
            ));
        }

        Ok(tag)
    }

    pub async fn list_for_user(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let tags: Vec<Self> = db
            .client
            .query("SELECT * FROM user_tag WHERE user_id = $user_id ORDER BY name ASC")
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(tags)
    }
}
