//! Role-based authorization for the portal.
//!
//! This crate owns the closed role set and its total order, the access
//! predicate, the static route policy table and the per-request guard
//! decision. It performs no I/O: identity resolution belongs to the session
//! layer and HTTP translation to the api crate.
//!
//! # Authorization flow
//!
//! 1. **Request arrives** at the API layer
//! 2. **Session resolver** yields an [`Identity`] or nothing
//! 3. **Route policy** maps the path to a [`Requirement`] (or public)
//! 4. **[`can_access`]** compares ranks
//! 5. **Decision** is made: Allow, or Deny with a [`guard::Denial`]
//!
//! # Example
//!
//! ```rust
//! use authz::{can_access, types::Role};
//!
//! assert!(can_access(Role::Mentor, Some(Role::Admin)));
//! assert!(!can_access(Role::Admin, Some(Role::Mentor)));
//! assert!(!can_access(Role::Trainee, None));
//! ```

pub mod error;
pub mod guard;
pub mod policy;
pub mod types;

pub use error::{AuthzError, Result};
pub use guard::{evaluate, Decision, Denial, RouteKind};
pub use policy::{Lookup, PolicyEntry, RoutePolicy};
pub use types::{Identity, Requirement, Role};

/// Decide whether a caller holding `actual` may do what `required` allows.
///
/// `true` iff `actual` is present and ranks at least as high as `required`.
/// There is no bypass for a missing identity. Pure and lock-free; safe to call
/// from any number of requests at once.
pub fn can_access(required: Role, actual: Option<Role>) -> bool {
    match actual {
        Some(actual) => actual.rank() >= required.rank(),
        None => false,
    }
}
