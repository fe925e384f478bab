pub mod auth;
pub mod database;
pub mod error;

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use auth::{AuthBackend, MagicLinkConfig, MagicLinkManager, SessionManager};
pub use auth::{SessionConfig, SqlxSessionStore};
use database::UserDatabase;

/// Accounts, sign-in and session resolution
pub struct UserManager {
    database: Arc<UserDatabase>,
    auth_backend: AuthBackend,
    session_manager: SessionManager,
    magic_links: MagicLinkManager,
    session_store: SqlxSessionStore,
    session_config: SessionConfig,
}

impl UserManager {
    pub async fn new(
        db_config: database::UserDatabaseConfig,
        session_config: SessionConfig,
        magic_link_config: MagicLinkConfig,
    ) -> error::Result<Self> {
        info!("Initializing user management system");

        let database = Arc::new(UserDatabase::new(db_config).await?);
        let auth_backend = AuthBackend::new(database.clone());
        let session_manager = SessionManager::new(database.clone());
        let magic_links = MagicLinkManager::new(magic_link_config);
        let session_store = SqlxSessionStore::new(database.pool().clone()).await?;

        info!("User management system initialized successfully");

        Ok(Self {
            database,
            auth_backend,
            session_manager,
            magic_links,
            session_store,
            session_config,
        })
    }

    /// Default layout under a data directory.
    pub async fn in_data_dir(
        data_path: &Path,
        session_config: SessionConfig,
        magic_link_config: MagicLinkConfig,
    ) -> error::Result<Self> {
        Self::new(
            database::UserDatabaseConfig::in_data_dir(data_path),
            session_config,
            magic_link_config,
        )
        .await
    }

    pub fn database(&self) -> &UserDatabase {
        &self.database
    }

    pub fn auth_backend(&self) -> &AuthBackend {
        &self.auth_backend
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn magic_links(&self) -> &MagicLinkManager {
        &self.magic_links
    }

    pub fn session_store(&self) -> &SqlxSessionStore {
        &self.session_store
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    pub async fn verify_integrity(&self) -> error::Result<bool> {
        self.database.verify_integrity().await
    }

    /// Clean up expired sessions and tokens
    pub async fn cleanup_expired(&self) -> error::Result<()> {
        let sessions = self.session_store.cleanup_expired().await?;
        let tokens = MagicLinkManager::cleanup_expired_tokens(&self.database).await?;

        info!(
            "Cleaned up {} expired sessions and {} sign-in tokens",
            sessions, tokens
        );
        Ok(())
    }
}

pub use database::UserDatabaseConfig;
pub use error::{Result as UserResult, UserError};

pub use auth::types::{
    normalize_email, AuthenticationMethod, Credentials, NewUser, PortalUser, SessionData,
};
pub use auth::{IssuedLink, SameSiteConfig};
