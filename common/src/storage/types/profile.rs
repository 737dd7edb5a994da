use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::chat_memory::MemoryType;

/// One consolidated memory inside a profile bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatedMemory {
    pub content: String,
    pub importance_score: f32,
    #[serde(default)]
    pub source_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStrategy {
    Similarity,
    Importance,
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidationSettings {
    #[serde(default = "default_auto_consolidate")]
    pub auto_consolidate: bool,
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: f32,
    #[serde(default = "default_max_memories_per_type")]
    pub max_memories_per_type: usize,
    #[serde(default = "default_consolidation_strategy")]
    pub consolidation_strategy: ConsolidationStrategy,
}

fn default_auto_consolidate() -> bool {
    true
}

fn default_consolidation_threshold() -> f32 {
    0.8
}

fn default_max_memories_per_type() -> usize {
    50
}

fn default_consolidation_strategy() -> ConsolidationStrategy {
    ConsolidationStrategy::Similarity
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self {
            auto_consolidate: default_auto_consolidate(),
            consolidation_threshold: default_consolidation_threshold(),
            max_memories_per_type: default_max_memories_per_type(),
            consolidation_strategy: default_consolidation_strategy(),
        }
    }
}

/// Versioned memory document on the profile. Every bucket defaults so a
/// reader tolerates documents written before a bucket existed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MemoryProfile {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub preferences: Vec<ConsolidatedMemory>,
    #[serde(default)]
    pub facts: Vec<ConsolidatedMemory>,
    #[serde(default)]
    pub context: Vec<ConsolidatedMemory>,
    #[serde(default)]
    pub insights: Vec<ConsolidatedMemory>,
    #[serde(default)]
    pub last_consolidated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consolidation_settings: ConsolidationSettings,
}

impl MemoryProfile {
    pub fn bucket(&self, memory_type: MemoryType) -> &Vec<ConsolidatedMemory> {
        match memory_type {
            MemoryType::UserPreference => &self.preferences,
            MemoryType::Fact => &self.facts,
            MemoryType::Context => &self.context,
            MemoryType::Insight => &self.insights,
        }
    }

    pub fn bucket_mut(&mut self, memory_type: MemoryType) -> &mut Vec<ConsolidatedMemory> {
        match memory_type {
            MemoryType::UserPreference => &mut self.preferences,
            MemoryType::Fact => &mut self.facts,
            MemoryType::Context => &mut self.context,
            MemoryType::Insight => &mut self.insights,
        }
    }
}

stored_object!(Profile, "profile", {
    username: Option<String>,
    nickname: Option<String>,
    email: String,
    avatar_url: Option<String>,
    bio: Option<String>,
    timezone: String,
    api_key: Option<String>,
    #[serde(default)]
    memory_profile: MemoryProfile
});

impl Profile {
    pub fn new(user_id: String, email: String) -> Self {
        let now = Utc::now();
        Self {
            // Shares its id with the auth identity
            id: user_id,
            created_at: now,
            updated_at: now,
            username: None,
            nickname: None,
            email,
            avatar_url: None,
            bio: None,
            timezone: "UTC".to_string(),
            api_key: None,
            memory_profile: MemoryProfile::default(),
        }
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let profiles: Vec<Self> = db
            .client
            .query("SELECT * FROM profile WHERE api_key = $api_key LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(profiles.into_iter().next())
    }

    pub async fn get_or_create(
        user_id: &str,
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(profile) = db.get_item::<Self>(user_id).await? {
            return Ok(profile);
        }

        let profile = Self::new(user_id.to_string(), email.to_string());
        db.store_item(profile.clone()).await?;
        Ok(profile)
    }

    pub async fn update_memory_profile(
        user_id: &str,
        memory_profile: MemoryProfile,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), user_id))
            .patch(PatchOp::replace("/memory_profile", memory_profile))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn update_consolidation_settings(
        user_id: &str,
        settings: ConsolidationSettings,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), user_id))
            .patch(PatchOp::replace(
                "/memory_profile/consolidation_settings",
                settings,
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let first = Profile::get_or_create("user1", "a@example.com", &db)
            .await
            .expect("create");
        let second = Profile::get_or_create("user1", "changed@example.com", &db)
            .await
            .expect("get");

        assert_eq!(first.id, second.id);
        assert_eq!(second.email, "a@example.com", "existing profile wins");
    }

    #[tokio::test]
    async fn test_memory_profile_round_trip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        Profile::get_or_create("user1", "a@example.com", &db)
            .await
            .expect("create");

        let mut memory_profile = MemoryProfile {
            version: 1,
            ..MemoryProfile::default()
        };
        memory_profile.facts.push(ConsolidatedMemory {
            content: "Works on distributed systems".into(),
            importance_score: 0.7,
            source_count: 3,
        });
        memory_profile.last_consolidated = Some(Utc::now());

        Profile::update_memory_profile("user1", memory_profile.clone(), &db)
            .await
            .expect("update");

        let fetched: Profile = db.get_item("user1").await.unwrap().unwrap();
        assert_eq!(fetched.memory_profile.facts.len(), 1);
        assert_eq!(fetched.memory_profile.version, 1);
        assert!(fetched.memory_profile.last_consolidated.is_some());
    }

    #[test]
    fn test_memory_profile_tolerates_missing_buckets() {
        let document = serde_json::json!({
            "version": 0,
            "facts": [{"content": "only facts", "importance_score": 0.4}]
        });

        let parsed: MemoryProfile = serde_json::from_value(document).expect("parse");
        assert_eq!(parsed.facts.len(), 1);
        assert!(parsed.preferences.is_empty());
        assert!(parsed.context.is_empty());
        assert_eq!(parsed.consolidation_settings.max_memories_per_type, 50);
    }

    #[tokio::test]
    async fn test_find_by_api_key() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut profile = Profile::new("user1".into(), "a@example.com".into());
        profile.api_key = Some("secret-key".into());
        db.store_item(profile).await.expect("store");

        let found = Profile::find_by_api_key("secret-key", &db)
            .await
            .expect("query");
        assert_eq!(found.map(|p| p.id), Some("user1".to_string()));

        let missing = Profile::find_by_api_key("wrong", &db).await.expect("query");
        assert!(missing.is_none());
    }

    #[test]
    fn test_bucket_accessors_cover_all_types() {
        let mut profile = MemoryProfile::default();
        for memory_type in MemoryType::ALL {
            profile.bucket_mut(memory_type).push(ConsolidatedMemory {
                content: memory_type.bucket().to_string(),
                importance_score: 0.5,
                source_count: 1,
            });
        }
        for memory_type in MemoryType::ALL {
            assert_eq!(profile.bucket(memory_type).len(), 1);
        }
    }
}
