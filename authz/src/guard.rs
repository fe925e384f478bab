//! Per-request guard decision.
//!
//! The HTTP layer resolves the caller's identity, then asks [`evaluate`] for a
//! [`Decision`]. Each request moves `UNCHECKED -> ALLOWED | DENIED` exactly
//! once; there are no retries.
//!
//! The predicate alone cannot tell "no identity" from "identity with too low
//! a rank", but callers must: pages redirect differently and APIs answer 401
//! versus 403. [`Denial`] carries that distinction.

use tracing::warn;

use crate::error::AuthzError;
use crate::policy::{Lookup, RoutePolicy};
use crate::types::{Identity, Requirement, Role};

/// Whether a path serves a page or an API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Page,
    Api,
}

impl RouteKind {
    const API_PREFIX: &'static str = "/api/";

    pub fn of(path: &str) -> Self {
        if path.starts_with(Self::API_PREFIX) || path == "/api" {
            RouteKind::Api
        } else {
            RouteKind::Page
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// No identity resolved.
    Unauthenticated,
    /// Identity resolved, rank below the required role.
    InsufficientRole { required: Role, actual: Role },
}

impl From<Denial> for AuthzError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Unauthenticated => AuthzError::Unauthenticated,
            Denial::InsufficientRole { required, actual } => {
                AuthzError::InsufficientRole { required, actual }
            }
        }
    }
}

/// Terminal outcome of guarding one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `identity` may reach `path`.
///
/// Unmatched paths are admitted; the startup coverage check is what keeps
/// routed paths from ever landing here.
pub fn evaluate(policy: &RoutePolicy, path: &str, identity: Option<&Identity>) -> Decision {
    let requirement = match policy.lookup(path) {
        Lookup::Public => return Decision::Allow,
        Lookup::Unmatched => {
            warn!("No route policy entry for {}, admitting as public", path);
            return Decision::Allow;
        }
        Lookup::Protected(entry) => entry.requires,
    };

    let actual = identity.map(|id| id.role);
    if requirement.admits(actual) {
        return Decision::Allow;
    }

    match (requirement, actual) {
        (_, None) => Decision::Deny(Denial::Unauthenticated),
        (Requirement::Role(required), Some(actual)) => {
            Decision::Deny(Denial::InsufficientRole { required, actual })
        }
        // An authenticated caller always satisfies AnyAuthenticated.
        (Requirement::AnyAuthenticated, Some(_)) => Decision::Allow,
    }
}
