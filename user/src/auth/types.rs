//! Authentication types

use authz::{Identity, Role};
use axum_login::AuthUser;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Result, UserError};

/// A portal account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl PortalUser {
    /// The guard's view of this user.
    pub fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.role)
    }
}

impl AuthUser for PortalUser {
    type Id = String;

    fn id(&self) -> Self::Id {
        self.id.clone()
    }

    fn session_auth_hash(&self) -> &[u8] {
        self.id.as_bytes()
    }
}

/// Raw `users` row. The role column is text and is parsed on the way out.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserRow {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserRow {
    pub(crate) fn into_user(self) -> Result<PortalUser> {
        Ok(PortalUser {
            role: self.role.parse()?,
            id: self.id,
            email: self.email,
            name: self.name,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login: self.last_login,
        })
    }

    /// Split into the public user and the stored password hash.
    pub(crate) fn into_parts(self) -> Result<(PortalUser, Option<String>)> {
        let hash = self.password_hash.clone();
        Ok((self.into_user()?, hash))
    }
}

/// Data needed to create an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    /// Required for ADMIN accounts, refused for every other role.
    pub password: Option<String>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            name: None,
            role,
            password: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Normalized email, or a validation error.
    pub(crate) fn validated_email(&self) -> Result<String> {
        normalize_email(&self.email)
    }
}

/// Lower-cased, trimmed email with a minimal shape check.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(UserError::Validation(format!(
            "{:?} is not a valid email address",
            email
        ))),
    }
}

/// Authentication credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credentials {
    /// Email and password. Accepted for ADMIN accounts only.
    Password {
        email: String,
        password: String,
        ip_address: Option<String>,
    },
    /// One-time sign-in link. Refused for ADMIN accounts.
    MagicLink {
        email: String,
        token: String,
        ip_address: Option<String>,
    },
}

impl Credentials {
    pub fn method(&self) -> AuthenticationMethod {
        match self {
            Credentials::Password { .. } => AuthenticationMethod::Password,
            Credentials::MagicLink { .. } => AuthenticationMethod::MagicLink,
        }
    }
}

/// Authentication method used
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    Password,
    MagicLink,
}

impl std::fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthenticationMethod::Password => write!(f, "password"),
            AuthenticationMethod::MagicLink => write!(f, "magic_link"),
        }
    }
}

/// Everything stored in a signed-in session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: String,
    pub email: String,
    /// Role at sign-in time. The resolver re-reads the live role.
    pub role: Role,
    pub auth_method: AuthenticationMethod,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_method_display() {
        assert_eq!(AuthenticationMethod::Password.to_string(), "password");
        assert_eq!(AuthenticationMethod::MagicLink.to_string(), "magic_link");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Mentor@Example.COM ").unwrap(),
            "mentor@example.com"
        );
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@localhost").is_err());
    }

    #[test]
    fn test_unknown_role_in_row_rejected() {
        let row = UserRow {
            id: "u1".into(),
            email: "a@example.com".into(),
            name: None,
            role: "OWNER".into(),
            password_hash: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login: None,
        };
        assert!(matches!(row.into_user(), Err(UserError::InvalidRole(_))));
    }

    #[test]
    fn test_credentials_method() {
        let creds = Credentials::MagicLink {
            email: "t@example.com".into(),
            token: "abc".into(),
            ip_address: None,
        };
        assert_eq!(creds.method(), AuthenticationMethod::MagicLink);
    }
}
