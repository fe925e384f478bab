//! Error types for the authorization system.
//!
//! # Security Note
//! Denial details (required role, matched prefix) are for logs and audit
//! entries only. Responses sent to callers carry the status and a generic
//! message.

use thiserror::Error;

use crate::types::Role;

/// Errors that can occur while loading policy or authorizing a request.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// A role name outside the closed role set.
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// A route requirement that is neither a role nor `AUTHENTICATED`.
    #[error("Unknown route requirement: {0}")]
    UnknownRequirement(String),

    /// No identity could be resolved for the request.
    #[error("Authentication required")]
    Unauthenticated,

    /// An identity was resolved but its rank is below the required one.
    #[error("Role {actual} does not satisfy required role {required}")]
    InsufficientRole { required: Role, actual: Role },

    /// Routed paths with no policy entry.
    ///
    /// This is a configuration error caught at startup, never a runtime
    /// denial.
    #[error("Route policy gap, no entry covers: {}", .0.join(", "))]
    PolicyGap(Vec<String>),

    /// The route policy table could not be read or is malformed.
    #[error("Route policy load failed: {0}")]
    PolicyLoad(String),
}

/// A specialized Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthzError::UnknownRole("owner".into());
        assert_eq!(err.to_string(), "Unknown role: owner");

        let err = AuthzError::InsufficientRole {
            required: Role::Admin,
            actual: Role::Trainee,
        };
        assert_eq!(
            err.to_string(),
            "Role TRAINEE does not satisfy required role ADMIN"
        );

        let err = AuthzError::PolicyGap(vec!["/reports".into(), "/api/v1/x".into()]);
        assert_eq!(
            err.to_string(),
            "Route policy gap, no entry covers: /reports, /api/v1/x"
        );
    }
}
