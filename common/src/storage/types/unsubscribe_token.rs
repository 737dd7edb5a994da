#![allow(clippy::module_name_repetitions)]
use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(UnsubscribeToken, "unsubscribe_token", {
    user_id: String,
    token: String
});

impl UnsubscribeToken {
    /// Derives the stable token for a user. The same (user, secret) pair
    /// always yields the same token, so links in old emails keep working.
    pub fn derive(user_id: &str, server_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(b":");
        hasher.update(server_secret.as_bytes());
        let digest = hasher.finalize();
        digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }

    pub async fn get_or_create(
        user_id: &str,
        server_secret: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let token = Self::derive(user_id, server_secret);

        if let Some(existing) = db.get_item::<Self>(&token).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let record = Self {
            // Keyed by the token itself so lookup from the link is a point read
            id: token.clone(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            token,
        };

        db.store_item(record.clone()).await?;
        Ok(record)
    }

    pub async fn resolve(token: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(token).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_derive_is_stable_and_user_specific() {
        let a1 = UnsubscribeToken::derive("user1", "secret");
        let a2 = UnsubscribeToken::derive("user1", "secret");
        let b = UnsubscribeToken::derive("user2", "secret");
        let c = UnsubscribeToken::derive("user1", "other-secret");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_ne!(a1, c);
        assert_eq!(a1.len(), 64);
    }

    #[tokio::test]
    async fn test_get_or_create_then_resolve() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let token = UnsubscribeToken::get_or_create("user1", "secret", &db)
            .await
            .expect("create");
        let again = UnsubscribeToken::get_or_create("user1", "secret", &db)
            .await
            .expect("get");
        assert_eq!(token.id, again.id);

        let resolved = UnsubscribeToken::resolve(&token.token, &db)
            .await
            .expect("resolve");
        assert_eq!(resolved.map(|t| t.user_id), Some("user1".to_string()));

        let unknown = UnsubscribeToken::resolve("missing", &db).await.expect("resolve");
        assert!(unknown.is_none());
    }
}
