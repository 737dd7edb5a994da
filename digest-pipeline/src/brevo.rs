use common::error::AppError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.brevo.com";

/// Thin client for the provider's transactional template API.
pub struct BrevoClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(rename = "messageId")]
    message_id: String,
}

impl BrevoClient {
    pub fn new(api_key: String) -> Result<Self, AppError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    /// Sends a templated transactional email; the digest payload travels
    /// under `params`. Returns the provider's message id.
    pub async fn send_template(
        &self,
        template_id: u64,
        to_email: &str,
        to_name: &str,
        params: &Value,
    ) -> Result<String, AppError> {
        let body = json!({
            "templateId": template_id,
            "to": [{ "email": to_email, "name": to_name }],
            "params": params,
        });

        let response = self
            .http
            .post(format!("{}/v3/smtp/email", self.base_url))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Auth("Email provider rejected the API key".to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), detail, "provider send failed");
            return Err(AppError::Upstream(format!(
                "Email provider returned {status}"
            )));
        }

        let parsed: SendResponse = response.json().await?;
        debug!(message_id = %parsed.message_id, "transactional email accepted");

        Ok(parsed.message_id)
    }
}

/// Retryable classes for the dispatcher's backoff loop: provider 5xx and
/// transport errors, never auth failures.
pub fn is_retryable_send_error(err: &AppError) -> bool {
    matches!(err, AppError::Upstream(_) | AppError::Reqwest(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_not_retryable() {
        assert!(!is_retryable_send_error(&AppError::Auth("bad key".into())));
    }

    #[test]
    fn upstream_errors_are_retryable() {
        assert!(is_retryable_send_error(&AppError::Upstream(
            "503".to_string()
        )));
    }

    #[tokio::test]
    async fn unreachable_provider_surfaces_reqwest_error() {
        let client = BrevoClient::with_base_url(
            "key".to_string(),
            "http://127.0.0.1:1".to_string(),
        )
        .expect("client");

        let result = client
            .send_template(1, "user@example.com", "User", &json!({}))
            .await;
        assert!(matches!(result, Err(AppError::Reqwest(_))));
    }
}
