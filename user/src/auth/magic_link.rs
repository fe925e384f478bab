//! One-time sign-in links for non-admin accounts
//!
//! Links are single use and short lived. Only a SHA-256 of the token is
//! stored. Delivery is not handled here: the link is written to the log for
//! an operator or an outbound mailer to pick up.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use authz::Role;

use super::types::{normalize_email, PortalUser};
use crate::{
    database::UserDatabase,
    error::{Result, UserError},
};

/// Sign-in link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagicLinkConfig {
    /// Token expiry in minutes
    pub token_expiry_minutes: i64,
    /// Base URL the link points at
    pub base_url: String,
}

impl Default for MagicLinkConfig {
    fn default() -> Self {
        Self {
            token_expiry_minutes: 10,
            base_url: "http://localhost:3030".to_string(),
        }
    }
}

impl MagicLinkConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// A freshly issued link. Never returned to an anonymous caller.
#[derive(Debug, Clone)]
pub struct IssuedLink {
    pub user_id: String,
    pub url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and redeems sign-in links
#[derive(Debug, Clone)]
pub struct MagicLinkManager {
    config: MagicLinkConfig,
}

impl MagicLinkManager {
    pub const VERIFY_PATH: &'static str = "/api/v1/auth/magic-link/verify";

    pub fn new(config: MagicLinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MagicLinkConfig {
        &self.config
    }

    /// Generate a secure random token
    fn generate_token() -> String {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        BASE64.encode(bytes)
    }

    fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Issue a link for `email`.
    ///
    /// Returns `None` for unknown, inactive and ADMIN accounts. Callers must
    /// answer the same way in every case so the response reveals nothing.
    pub async fn issue(&self, db: &UserDatabase, email: &str) -> Result<Option<IssuedLink>> {
        let email = normalize_email(email)?;

        let Some(user) = db.find_by_email(&email).await? else {
            info!("Sign-in link requested for unknown email");
            return Ok(None);
        };
        if user.role == Role::Admin {
            warn!("Sign-in link refused for ADMIN account {}", user.id);
            return Ok(None);
        }
        if !user.is_active {
            warn!("Sign-in link refused for inactive account {}", user.id);
            return Ok(None);
        }

        let token = Self::generate_token();
        let token_id = Ulid::new().to_string();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(self.config.token_expiry_minutes);

        sqlx::query(
            r#"
            INSERT INTO magic_link_tokens (
                id, user_id, token_hash, email, expires_at, used, created_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&token_id)
        .bind(&user.id)
        .bind(Self::hash_token(&token))
        .bind(&email)
        .bind(expires_at)
        .bind(now)
        .execute(db.pool())
        .await
        .map_err(|e| {
            error!("Failed to store sign-in token: {}", e);
            UserError::Database(e)
        })?;

        let url = format!(
            "{}{}?token={}&email={}",
            self.config.base_url,
            Self::VERIFY_PATH,
            urlencoding::encode(&token),
            urlencoding::encode(&email)
        );
        info!(
            "Sign-in link for account {} (expires {}): {}",
            user.id, expires_at, url
        );

        Ok(Some(IssuedLink {
            user_id: user.id,
            url,
            token,
            expires_at,
        }))
    }

    /// Redeem a token. Each token succeeds at most once.
    pub async fn verify_token(
        db: &UserDatabase,
        email: &str,
        token: &str,
    ) -> Result<Option<PortalUser>> {
        let email = email.trim().to_ascii_lowercase();

        let token_row = sqlx::query(
            r#"
            SELECT id, user_id, expires_at
            FROM magic_link_tokens
            WHERE email = ? AND token_hash = ?
            "#,
        )
        .bind(&email)
        .bind(Self::hash_token(token))
        .fetch_optional(db.pool())
        .await?;

        let Some(token_row) = token_row else {
            warn!("Unknown sign-in token presented");
            return Ok(None);
        };

        let token_id: String = token_row.get("id");
        let user_id: String = token_row.get("user_id");
        let expires_at: DateTime<Utc> = token_row.get("expires_at");

        if expires_at < Utc::now() {
            warn!("Expired sign-in token for account {}", user_id);
            return Ok(None);
        }

        // Conditional update so two concurrent redemptions cannot both win.
        let claimed = sqlx::query("UPDATE magic_link_tokens SET used = 1 WHERE id = ? AND used = 0")
            .bind(&token_id)
            .execute(db.pool())
            .await?;
        if claimed.rows_affected() != 1 {
            warn!("Reused sign-in token for account {}", user_id);
            return Ok(None);
        }

        let Some(user) = db.find_by_id(&user_id).await? else {
            return Ok(None);
        };
        if user.role == Role::Admin || !user.is_active {
            warn!("Sign-in token rejected for account {}", user.id);
            return Ok(None);
        }

        info!("Sign-in link redeemed for account {}", user.id);
        Ok(Some(user))
    }

    /// Drop expired and used tokens. Returns how many were removed.
    pub async fn cleanup_expired_tokens(db: &UserDatabase) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM magic_link_tokens WHERE expires_at < ? OR used = 1")
            .bind(Utc::now())
            .execute(db.pool())
            .await?;

        if deleted.rows_affected() > 0 {
            debug!(
                "Cleaned up {} expired/used sign-in tokens",
                deleted.rows_affected()
            );
        }
        Ok(deleted.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::NewUser;
    use crate::database::tests::test_db;

    #[test]
    fn test_token_generation() {
        let token1 = MagicLinkManager::generate_token();
        let token2 = MagicLinkManager::generate_token();

        assert_ne!(token1, token2);
        assert!(token1
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(token1.len() >= 32);
    }

    #[test]
    fn test_config_default() {
        let config = MagicLinkConfig::default().with_base_url("https://portal.example.com/");
        assert_eq!(config.token_expiry_minutes, 10);
        assert_eq!(config.base_url, "https://portal.example.com");
    }

    #[tokio::test]
    async fn test_issue_and_redeem_once() {
        let (db, _dir) = test_db().await;
        let user = db
            .create_user(NewUser::new("trainee@example.com", Role::Trainee))
            .await
            .unwrap();
        let manager = MagicLinkManager::new(MagicLinkConfig::default());

        let link = manager.issue(&db, "trainee@example.com").await.unwrap().unwrap();
        assert_eq!(link.user_id, user.id);
        assert!(link.url.contains(MagicLinkManager::VERIFY_PATH));

        let redeemed = MagicLinkManager::verify_token(&db, "trainee@example.com", &link.token)
            .await
            .unwrap();
        assert_eq!(redeemed.map(|u| u.id), Some(user.id));

        let again = MagicLinkManager::verify_token(&db, "trainee@example.com", &link.token)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_admin_and_unknown_get_no_link() {
        let (db, _dir) = test_db().await;
        db.create_user(NewUser::new("admin@example.com", Role::Admin).with_password("admin-password"))
            .await
            .unwrap();
        let manager = MagicLinkManager::new(MagicLinkConfig::default());

        assert!(manager.issue(&db, "admin@example.com").await.unwrap().is_none());
        assert!(manager.issue(&db, "nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (db, _dir) = test_db().await;
        db.create_user(NewUser::new("mentor@example.com", Role::Mentor))
            .await
            .unwrap();
        let manager = MagicLinkManager::new(MagicLinkConfig {
            token_expiry_minutes: -1,
            ..MagicLinkConfig::default()
        });

        let link = manager.issue(&db, "mentor@example.com").await.unwrap().unwrap();
        let redeemed = MagicLinkManager::verify_token(&db, "mentor@example.com", &link.token)
            .await
            .unwrap();
        assert!(redeemed.is_none());

        assert_eq!(MagicLinkManager::cleanup_expired_tokens(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_email_rejected() {
        let (db, _dir) = test_db().await;
        db.create_user(NewUser::new("a@example.com", Role::Employer))
            .await
            .unwrap();
        let manager = MagicLinkManager::new(MagicLinkConfig::default());
        let link = manager.issue(&db, "a@example.com").await.unwrap().unwrap();

        let redeemed = MagicLinkManager::verify_token(&db, "b@example.com", &link.token)
            .await
            .unwrap();
        assert!(redeemed.is_none());
    }
}
