use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::user_tag::UserTag;

stored_object!(InsightTag, "insight_tag", {
    insight_id: String,
    tag_id: String,
    user_id: String
});

impl InsightTag {
    /// Links a tag to an insight after verifying the tag belongs to the same
    /// user. The record id encodes the pair so a duplicate link is rejected
    /// by the store.
    pub async fn link(
        insight_id: &str,
        tag_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let _tag = UserTag::get_owned(tag_id, user_id, db).await?;

        let now = Utc::now();
        let link = Self {
            id: format!("{insight_id}_{tag_id}"),
            created_at: now,
            updated_at: now,
            insight_id: insight_id.to_string(),
            tag_id: tag_id.to_string(),
            user_id: user_id.to_string(),
        };

        db.store_item(link.clone()).await?;
        Ok(link)
    }

    pub async fn replace_for_insight(
        insight_id: &str,
        tag_ids: &[String],
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE insight_tag WHERE insight_id = $insight_id")
            .bind(("insight_id", insight_id.to_string()))
            .await?;

        for tag_id in tag_ids {
            Self::link(insight_id, tag_id, user_id, db).await?;
        }

        Ok(())
    }

    pub async fn tags_for_insight(
        insight_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<UserTag>, AppError> {
        let links: Vec<Self> = db
            .client
            .query("SELECT * FROM insight_tag WHERE insight_id = $insight_id")
            .bind(("insight_id", insight_id.to_string()))
            .await?
            .take(0)?;

        let mut tags = Vec::with_capacity(links.len());
        for link in links {
            if let Some(tag) = db.get_item::<UserTag>(&link.tag_id).await? {
                tags.push(tag);
            }
        }

        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_link_rejects_foreign_tag() {
        let db = memory_db().await;

        let tag = UserTag::new("other_user".into(), "reading".into(), "#fff".into());
        db.store_item(tag.clone()).await.expect("store tag");

        let result = InsightTag::link("insight1", &tag.id, "user1", &db).await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_link_is_unique_per_pair() {
        let db = memory_db().await;

        let tag = UserTag::new("user1".into(), "reading".into(), "#fff".into());
        db.store_item(tag.clone()).await.expect("store tag");

        InsightTag::link("insight1", &tag.id, "user1", &db)
            .await
            .expect("first link");
        let duplicate = InsightTag::link("insight1", &tag.id, "user1", &db).await;
        assert!(duplicate.is_err(), "duplicate (insight, tag) link must fail");
    }

    #[tokio::test]
    async fn test_replace_for_insight_swaps_links() {
        let db = memory_db().await;

        let tag_a = UserTag::new("user1".into(), "a".into(), "#fff".into());
        let tag_b = UserTag::new("user1".into(), "b".into(), "#000".into());
        db.store_item(tag_a.clone()).await.expect("store a");
        db.store_item(tag_b.clone()).await.expect("store b");

        InsightTag::replace_for_insight("insight1", &[tag_a.id.clone()], "user1", &db)
            .await
            .expect("first set");
        InsightTag::replace_for_insight("insight1", &[tag_b.id.clone()], "user1", &db)
            .await
            .expect("second set");

        let tags = InsightTag::tags_for_insight("insight1", &db)
            .await
            .expect("tags");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, tag_b.id);
    }
}
