//! Authentication for the portal
//!
//! - Session management with tower-sessions
//! - Admin password sign-in (argon2)
//! - One-time sign-in links for every other role

pub mod magic_link;
pub mod password;
pub mod session;
pub mod store;
pub mod types;

use async_trait::async_trait;
use authz::Role;
use axum_login::{AuthnBackend, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use magic_link::{IssuedLink, MagicLinkConfig, MagicLinkManager};
pub use session::SessionManager;
pub use store::{SameSiteConfig, SessionConfig, SqlxSessionStore};
pub use types::{AuthenticationMethod, Credentials, NewUser, PortalUser, SessionData};

use crate::{database::UserDatabase, error::UserError};

/// Authentication backend for axum-login
#[derive(Clone)]
pub struct AuthBackend {
    db: Arc<UserDatabase>,
}

impl AuthBackend {
    pub fn new(db: Arc<UserDatabase>) -> Self {
        Self { db }
    }

    async fn authenticate_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<PortalUser>, UserError> {
        let Some((user, hash)) = self.db.find_with_password_hash(email).await? else {
            return Ok(None);
        };
        if user.role != Role::Admin || !user.is_active {
            return Ok(None);
        }
        let Some(hash) = hash else {
            warn!("ADMIN account {} has no password set", user.id);
            return Ok(None);
        };
        if password::verify_password(password, &hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl AuthnBackend for AuthBackend {
    type User = PortalUser;
    type Credentials = Credentials;
    type Error = UserError;

    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<Option<Self::User>, Self::Error> {
        let method = creds.method();
        info!("Authentication attempt using method: {}", method);

        let result = match creds {
            Credentials::Password {
                email, password, ..
            } => self.authenticate_password(&email, &password).await,
            Credentials::MagicLink { email, token, .. } => {
                MagicLinkManager::verify_token(&self.db, &email, &token).await
            }
        };

        match &result {
            Ok(Some(user)) => info!("User {} authenticated via {}", user.id, method),
            Ok(None) => warn!("Authentication failed for method: {}", method),
            Err(e) => warn!("Authentication error for method {}: {}", method, e),
        }
        result
    }

    async fn get_user(&self, user_id: &UserId<Self>) -> Result<Option<Self::User>, Self::Error> {
        debug!("Fetching user with ID: {}", user_id);
        Ok(self
            .db
            .find_by_id(user_id)
            .await?
            .filter(|user| user.is_active))
    }
}
