//! SQLx session store and cookie settings for tower-sessions

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::Duration;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{debug, error, info};

use crate::error::{Result, UserError};

/// SQLx-based session store for tower-sessions
#[derive(Debug, Clone)]
pub struct SqlxSessionStore {
    store: SqliteStore,
    pool: SqlitePool,
}

impl SqlxSessionStore {
    /// Create a new SQLx session store
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        Self::create_session_table(&pool).await?;

        let store = SqliteStore::new(pool.clone());

        info!("SQLx session store initialized");
        Ok(Self { store, pool })
    }

    /// Create the session table in the database
    async fn create_session_table(pool: &SqlitePool) -> Result<()> {
        let query = r#"
            CREATE TABLE IF NOT EXISTS tower_sessions (
                id TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL,
                expiry_date INTEGER NOT NULL
            )
        "#;

        sqlx::query(query).execute(pool).await.map_err(|e| {
            error!("Failed to create session table: {}", e);
            UserError::Database(e)
        })?;

        let index_query = r#"
            CREATE INDEX IF NOT EXISTS idx_tower_sessions_expiry
            ON tower_sessions(expiry_date)
        "#;

        sqlx::query(index_query).execute(pool).await.map_err(|e| {
            error!("Failed to create session index: {}", e);
            UserError::Database(e)
        })?;

        debug!("Session table and indexes created/verified");
        Ok(())
    }

    /// Get the underlying SqliteStore
    pub fn inner(&self) -> &SqliteStore {
        &self.store
    }

    /// Delete expired sessions. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let deleted = sqlx::query("DELETE FROM tower_sessions WHERE expiry_date < ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to cleanup expired sessions: {}", e);
                UserError::Session(format!("Session cleanup failed: {}", e))
            })?;

        debug!("Removed {} expired sessions", deleted.rows_affected());
        Ok(deleted.rows_affected())
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session cookie name
    pub cookie_name: String,
    /// Inactivity timeout in seconds
    pub timeout_seconds: i64,
    /// Whether to use secure cookies (HTTPS only)
    pub secure: bool,
    /// SameSite cookie attribute
    pub same_site: SameSiteConfig,
    /// HTTP only cookie (not accessible via JavaScript)
    pub http_only: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "portal_session".to_string(),
            timeout_seconds: 86400, // 24 hours
            secure: false,
            same_site: SameSiteConfig::Lax,
            http_only: true,
        }
    }
}

impl SessionConfig {
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Session layer over `store` with these cookie settings.
    pub fn layer<S: SessionStore + Clone>(&self, store: S) -> SessionManagerLayer<S> {
        SessionManagerLayer::new(store)
            .with_name(self.cookie_name.clone())
            .with_secure(self.secure)
            .with_http_only(self.http_only)
            .with_same_site(self.same_site.into())
            .with_path("/")
            .with_expiry(Expiry::OnInactivity(Duration::seconds(
                self.timeout_seconds,
            )))
    }
}

/// SameSite cookie configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSiteConfig {
    Strict,
    Lax,
    None,
}

impl From<SameSiteConfig> for tower_sessions::cookie::SameSite {
    fn from(config: SameSiteConfig) -> Self {
        match config {
            SameSiteConfig::Strict => tower_sessions::cookie::SameSite::Strict,
            SameSiteConfig::Lax => tower_sessions::cookie::SameSite::Lax,
            SameSiteConfig::None => tower_sessions::cookie::SameSite::None,
        }
    }
}
