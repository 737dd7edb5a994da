use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Hard ceiling on generated summaries; anything longer is truncated on write.
pub const MAX_SUMMARY_LEN: usize = 1500;

stored_object!(InsightContent, "insight_content", {
    insight_id: String,
    user_id: String,
    url: String,
    text: String,
    markdown: String,
    summary: String,
    html: Option<String>,
    thought: Option<String>,
    content_type: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    extracted_at: DateTime<Utc>
});

impl InsightContent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        insight_id: String,
        user_id: String,
        url: String,
        text: String,
        markdown: String,
        summary: String,
        html: Option<String>,
        thought: Option<String>,
        content_type: String,
    ) -> Self {
        let now = Utc::now();
        let mut summary = summary;
        if summary.len() > MAX_SUMMARY_LEN {
            summary = summary.chars().take(MAX_SUMMARY_LEN).collect();
        }

        Self {
            // 1:1 with the insight, so the record shares its id
            id: insight_id.clone(),
            created_at: now,
            updated_at: now,
            insight_id,
            user_id,
            url,
            text,
            markdown,
            summary,
            html,
            thought,
            content_type,
            extracted_at: now,
        }
    }

    /// Upsert keyed by insight id so re-running ingestion replaces the row.
    pub async fn upsert(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let _stored: Option<Self> = db
            .client
            .upsert((Self::table_name(), self.id.clone()))
            .content(self.clone())
            .await?;

        Ok(())
    }

    pub async fn get_by_insight_id(
        insight_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(insight_id).await?)
    }
}
