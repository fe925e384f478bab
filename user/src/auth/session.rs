//! Session management and identity resolution

use authz::Identity;
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{debug, warn};

use super::types::{AuthenticationMethod, PortalUser, SessionData};
use crate::database::UserDatabase;
use crate::error::{Result, UserError};

/// Session keys used for storing data
pub struct SessionKeys;

impl SessionKeys {
    pub const USER: &'static str = "portal.user";
}

/// Writes sign-ins into sessions and resolves sessions back to identities.
#[derive(Clone)]
pub struct SessionManager {
    db: Arc<UserDatabase>,
}

impl SessionManager {
    pub fn new(db: Arc<UserDatabase>) -> Self {
        Self { db }
    }

    /// Bind `user` to `session`.
    ///
    /// The session id is cycled first so an id planted before sign-in is
    /// never promoted to an authenticated session.
    pub async fn create_session(
        &self,
        session: &Session,
        user: &PortalUser,
        auth_method: AuthenticationMethod,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<()> {
        let now = chrono::Utc::now();

        session
            .cycle_id()
            .await
            .map_err(|e| UserError::Session(format!("Failed to cycle session id: {}", e)))?;

        let data = SessionData {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            auth_method,
            ip_address,
            user_agent,
            created_at: now,
            last_activity: now,
        };
        session
            .insert(SessionKeys::USER, &data)
            .await
            .map_err(|e| UserError::Session(format!("Failed to store session data: {}", e)))?;

        session
            .save()
            .await
            .map_err(|e| UserError::Session(format!("Failed to save session: {}", e)))?;

        self.db.record_login(&user.id).await?;

        debug!("Session created for user: {}", user.id);
        Ok(())
    }

    /// Raw session payload, if any.
    pub async fn get_session_data(session: &Session) -> Result<Option<SessionData>> {
        session
            .get::<SessionData>(SessionKeys::USER)
            .await
            .map_err(|e| UserError::Session(format!("Failed to read session data: {}", e)))
    }

    /// Resolve the caller behind `session`.
    ///
    /// The role comes from the users table, not from the session payload, so
    /// a role change or deactivation takes effect on the next request. Missing
    /// data, unknown users and inactive users all resolve to `None`.
    pub async fn resolve_identity(&self, session: &Session) -> Result<Option<Identity>> {
        let Some(data) = Self::get_session_data(session).await? else {
            return Ok(None);
        };

        match self.db.find_by_id(&data.user_id).await? {
            Some(user) if user.is_active => {
                if user.role != data.role {
                    debug!(
                        "Role for {} changed since sign-in: {} -> {}",
                        user.id, data.role, user.role
                    );
                }
                Ok(Some(user.identity()))
            }
            Some(user) => {
                warn!("Session for inactive account {} ignored", user.id);
                Ok(None)
            }
            None => {
                warn!("Session for unknown account {} ignored", data.user_id);
                Ok(None)
            }
        }
    }

    /// Destroy a session (logout)
    pub async fn destroy_session(session: &Session) -> Result<()> {
        session
            .flush()
            .await
            .map_err(|e| UserError::Session(format!("Failed to flush session: {}", e)))?;

        debug!("Session destroyed");
        Ok(())
    }
}
