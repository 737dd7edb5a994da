use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_URL_LEN: usize = 500;
pub const MAX_THOUGHT_LEN: usize = 2000;

stored_object!(Insight, "insight", {
    user_id: String,
    url: String,
    title: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    thought: Option<String>
});

/// Page of insights plus the pagination envelope returned by the list endpoint.
#[derive(Debug, Serialize)]
pub struct InsightPage {
    pub insights: Vec<Insight>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl Insight {
    pub fn new(
        user_id: String,
        url: String,
        thought: Option<String>,
    ) -> Result<Self, AppError> {
        if url.is_empty() || url.len() > MAX_URL_LEN {
            return Err(AppError::Validation(format!(
                "URL must be between 1 and {MAX_URL_LEN} characters"
            )));
        }
        if thought.as_ref().is_some_and(|t| t.len() > MAX_THOUGHT_LEN) {
            return Err(AppError::Validation(format!(
                "Thought must be at most {MAX_THOUGHT_LEN} characters"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            url,
            title: None,
            description: None,
            image_url: None,
            thought,
        })
    }

    /// Fetches an insight and verifies the caller owns it.
    pub async fn get_owned(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let insight: Option<Self> = db.get_item(id).await?;
        let insight =
            insight.ok_or_else(|| AppError::NotFound("Insight not found".to_string()))?;

        if insight.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this insight".to_string(),
            ));
        }

        Ok(insight)
    }

    /// Applies the metadata produced by the ingestion pipeline. User-provided
    /// fields win over extracted ones, so only unset fields are overwritten.
    pub async fn apply_extracted_metadata(
        id: &str,
        title: Option<String>,
        description: Option<String>,
        image_url: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let current: Option<Self> = db.get_item(id).await?;
        let current =
            current.ok_or_else(|| AppError::NotFound("Insight not found".to_string()))?;

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/title",
                current.title.or(title),
            ))
            .patch(PatchOp::replace(
                "/description",
                current.description.or(description),
            ))
            .patch(PatchOp::replace(
                "/image_url",
                current.image_url.or(image_url),
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn patch(
        id: &str,
        user_id: &str,
        title: Option<String>,
        description: Option<String>,
        thought: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let current = Self::get_owned(id, user_id, db).await?;

        if thought.as_ref().is_some_and(|t| t.len() > MAX_THOUGHT_LEN) {
            return Err(AppError::Validation(format!(
                "Thought must be at most {MAX_THOUGHT_LEN} characters"
            )));
        }

        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", title.or(current.title)))
            .patch(PatchOp::replace(
                "/description",
                description.or(current.description),
            ))
            .patch(PatchOp::replace("/thought", thought.or(current.thought)))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Insight not found".to_string()))
    }

    /// Deletes an insight together with its content, chunks and tag links.
    pub async fn delete_cascading(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        // Ownership check up front so the transaction only ever runs for the owner
        let _insight = Self::get_owned(id, user_id, db).await?;

        db.client
            .query("BEGIN TRANSACTION;")
            .query("DELETE insight_content WHERE insight_id = $insight_id;")
            .query("DELETE insight_chunk WHERE insight_id = $insight_id;")
            .query("DELETE insight_tag WHERE insight_id = $insight_id;")
            .query("DELETE type::thing('insight', $insight_id);")
            .query("COMMIT TRANSACTION;")
            .bind(("insight_id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Paginated listing with an optional case-insensitive search over
    /// title, description and url.
    pub async fn list_page(
        user_id: &str,
        page: usize,
        limit: usize,
        search: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<InsightPage, AppError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let start = (page - 1).saturating_mul(limit);

        let search_clause = if search.is_some() {
            "AND (string::lowercase(title ?? '') CONTAINS $needle
              OR string::lowercase(description ?? '') CONTAINS $needle
              OR string::lowercase(url) CONTAINS $needle)"
        } else {
            ""
        };

        let list_sql = format!(
            "SELECT * FROM insight WHERE user_id = $user_id {search_clause}
             ORDER BY created_at DESC LIMIT $limit START $start;"
        );
        let count_sql = format!(
            "SELECT count() AS total FROM insight WHERE user_id = $user_id {search_clause} GROUP ALL;"
        );

        let needle = search.map(str::to_lowercase).unwrap_or_default();

        let mut response = db
            .client
            .query(list_sql)
            .query(count_sql)
            .bind(("user_id", user_id.to_string()))
            .bind(("needle", needle))
            .bind(("limit", limit))
            .bind(("start", start))
            .await?;

        let insights: Vec<Self> = response.take(0)?;

        #[derive(Deserialize)]
        struct CountRow {
            total: usize,
        }
        let count: Option<CountRow> = response.take(1)?;
        let total = count.map_or(0, |c| c.total);
        let total_pages = total.div_ceil(limit);

        Ok(InsightPage {
            insights,
            page,
            limit,
            total,
            total_pages,
        })
    }

    pub async fn list_all(user_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let insights: Vec<Self> = db
            .client
            .query("SELECT * FROM insight WHERE user_id = $user_id ORDER BY created_at DESC")
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(insights)
    }

    /// Insights changed since the given instant, used by incremental sync.
    pub async fn list_changed_since(
        user_id: &str,
        since: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let insights: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM insight WHERE user_id = $user_id AND updated_at > $since
                 ORDER BY updated_at ASC",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("since", surrealdb::sql::Datetime::from(since)))
            .await?
            .take(0)?;

        Ok(insights)
    }

    /// Insights created or updated within a window, used by the weekly digest.
    /// Intentionally inclusive of updates so the digest sections and the AI
    /// summary cover the same set.
    pub async fn list_in_window(
        user_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let insights: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM insight WHERE user_id = $user_id
                 AND (created_at >= $start OR updated_at >= $start)
                 AND created_at < $end
                 ORDER BY created_at DESC",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("start", surrealdb::sql::Datetime::from(window_start)))
            .bind(("end", surrealdb::sql::Datetime::from(window_end)))
            .await?
            .take(0)?;

        Ok(insights)
    }

    /// Greatest updated_at across the user's insights; the ETag basis for
    /// incremental sync.
    pub async fn latest_change(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM insight WHERE user_id = $user_id
                 ORDER BY updated_at DESC LIMIT 1",
            )
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(latest.into_iter().next().map(|insight| insight.updated_at))
    }
}
