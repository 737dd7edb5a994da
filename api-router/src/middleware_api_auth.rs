use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::{error::AppError, storage::db::SurrealDbClient, storage::types::profile::Profile};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

/// The resolved caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// One way of turning a bearer token into a user. Verifiers are tried in
/// declared order; the first match wins.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Option<AuthUser>, AppError>;
}

/// Opaque tokens resolved by the external auth backend.
pub struct OpaqueServiceTokenVerifier {
    http: reqwest::Client,
    backend_url: String,
}

#[derive(Deserialize)]
struct BackendVerifyResponse {
    user_id: String,
    email: String,
}

impl OpaqueServiceTokenVerifier {
    pub fn new(backend_url: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()?;
        Ok(Self { http, backend_url })
    }
}

#[async_trait]
impl TokenVerifier for OpaqueServiceTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<AuthUser>, AppError> {
        let response = self
            .http
            .get(format!("{}/v1/verify", self.backend_url))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Auth backend returned {}",
                response.status()
            )));
        }

        let verified: BackendVerifyResponse = response.json().await?;
        Ok(Some(AuthUser {
            id: verified.user_id,
            email: verified.email,
        }))
    }
}

/// API keys stored on the local profile row.
pub struct LocalApiKeyVerifier {
    db: Arc<SurrealDbClient>,
}

impl LocalApiKeyVerifier {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenVerifier for LocalApiKeyVerifier {
    async fn verify(&self, token: &str) -> Result<Option<AuthUser>, AppError> {
        let profile = Profile::find_by_api_key(token, &self.db).await?;
        Ok(profile.map(|p| AuthUser {
            id: p.id,
            email: p.email,
        }))
    }
}

/// Builds the verifier chain from configuration. The auth backend, when
/// configured, is consulted before local API keys.
pub fn build_verifier_chain(
    db: &Arc<SurrealDbClient>,
    auth_backend_url: Option<&str>,
) -> Vec<Box<dyn TokenVerifier>> {
    let mut chain: Vec<Box<dyn TokenVerifier>> = Vec::new();

    if let Some(backend_url) = auth_backend_url {
        if let Ok(verifier) = OpaqueServiceTokenVerifier::new(backend_url.to_string()) {
            chain.push(Box::new(verifier));
        }
    }
    chain.push(Box::new(LocalApiKeyVerifier::new(Arc::clone(db))));

    chain
}

pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    let mut user = None;
    for verifier in state.verifiers.iter() {
        if let Some(resolved) = verifier.verify(&token).await? {
            user = Some(resolved);
            break;
        }
    }

    let user =
        user.ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;
    debug!(user_id = %user.id, "request authenticated");

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        .map(String::from)
}
