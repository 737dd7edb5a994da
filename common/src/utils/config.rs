use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_rag_default_k")]
    pub rag_default_k: usize,
    #[serde(default = "default_rag_default_min_score")]
    pub rag_default_min_score: f32,
    #[serde(default = "default_rag_max_context_tokens")]
    pub rag_max_context_tokens: usize,
    #[serde(default = "default_rate_limit_requests_per_minute")]
    pub rate_limit_requests_per_minute: u32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_summary_cache_ttl_secs")]
    pub summary_cache_ttl_secs: u64,
    #[serde(default = "default_fetch_page_content_enabled")]
    pub fetch_page_content_enabled: bool,
    #[serde(default)]
    pub auth_backend_url: Option<String>,
    #[serde(default)]
    pub brevo_api_key: Option<String>,
    #[serde(default = "default_brevo_digest_template_id")]
    pub brevo_digest_template_id: u64,
    #[serde(default)]
    pub cron_secret: Option<String>,
    #[serde(default = "default_unsubscribe_secret")]
    pub unsubscribe_secret: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_rag_default_k() -> usize {
    6
}

fn default_rag_default_min_score() -> f32 {
    0.2
}

fn default_rag_max_context_tokens() -> usize {
    2000
}

fn default_rate_limit_requests_per_minute() -> u32 {
    30
}

fn default_summary_max_tokens() -> u32 {
    300
}

fn default_summary_cache_ttl_secs() -> u64 {
    3600
}

fn default_fetch_page_content_enabled() -> bool {
    true
}

fn default_brevo_digest_template_id() -> u64 {
    1
}

fn default_unsubscribe_secret() -> String {
    "change-me".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Config with inert endpoints for tests that never reach the network.
    pub fn for_tests() -> Self {
        Self {
            openai_api_key: "test-key".to_string(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            http_port: 0,
            openai_base_url: "http://127.0.0.1:1".to_string(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            rag_default_k: default_rag_default_k(),
            rag_default_min_score: default_rag_default_min_score(),
            rag_max_context_tokens: default_rag_max_context_tokens(),
            rate_limit_requests_per_minute: default_rate_limit_requests_per_minute(),
            summary_max_tokens: default_summary_max_tokens(),
            summary_cache_ttl_secs: default_summary_cache_ttl_secs(),
            fetch_page_content_enabled: true,
            auth_backend_url: None,
            brevo_api_key: None,
            brevo_digest_template_id: default_brevo_digest_template_id(),
            cron_secret: Some("test-cron-secret".to_string()),
            unsubscribe_secret: "test-unsubscribe-secret".to_string(),
        }
    }
}
