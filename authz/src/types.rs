//! Core authorization types for the portal.
//!
//! # Role hierarchy
//!
//! Roles form a single total order. A higher rank can do everything a lower
//! rank can:
//!
//! ```text
//! TRAINEE (0) < EMPLOYER (1) < MENTOR (2) < ADMIN (3)
//! ```
//!
//! The order is a policy choice, not an organizational fact: an EMPLOYER ranks
//! below a MENTOR even though neither is senior to the other. Because any two
//! roles are comparable, the model cannot express capabilities that belong to
//! one role but not to a higher one (for example an employer-only roster
//! export). Checks that are really capability checks must still be phrased as
//! "at least this role".
//!
//! # Security Note
//! An [`Identity`] must only ever be built from an authenticated session.
//! Never derive a role from request headers or other caller-controlled input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// A principal category from the closed portal role set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Trainee,
    Employer,
    Mentor,
    Admin,
}

impl Role {
    /// Every role, in ascending rank order.
    pub const ALL: [Role; 4] = [Role::Trainee, Role::Employer, Role::Mentor, Role::Admin];

    /// Position of the role in the hierarchy. Higher rank means a superset of
    /// capabilities.
    pub const fn rank(self) -> u8 {
        match self {
            Role::Trainee => 0,
            Role::Employer => 1,
            Role::Mentor => 2,
            Role::Admin => 3,
        }
    }

    /// Canonical upper-case name, as stored in sessions and the users table.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Trainee => "TRAINEE",
            Role::Employer => "EMPLOYER",
            Role::Mentor => "MENTOR",
            Role::Admin => "ADMIN",
        }
    }

    /// Landing page for a signed-in user of this role.
    pub const fn dashboard_route(self) -> &'static str {
        match self {
            Role::Trainee => "/dashboard/trainee",
            Role::Employer => "/dashboard/employer",
            Role::Mentor => "/dashboard/mentor",
            Role::Admin => "/dashboard/admin",
        }
    }
}

// `Role::ALL` must list every role with strictly increasing ranks. A role added
// to the enum without a rank does not compile (exhaustive match above); a role
// added with a duplicate or out-of-order rank fails here.
const _: () = {
    let mut i = 1;
    while i < Role::ALL.len() {
        assert!(Role::ALL[i - 1].rank() < Role::ALL[i].rank());
        i += 1;
    }
};

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AuthzError::UnknownRole(s.to_string()))
    }
}

/// Read-only snapshot of an authenticated principal.
///
/// Owned by the session layer; the guard only borrows it for the duration of
/// one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier (ULID)
    pub id: String,
    /// The single role the principal carries
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// What a protected route demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Requirement {
    /// Caller must hold at least this role.
    Role(Role),
    /// Any authenticated caller, role irrelevant.
    AnyAuthenticated,
}

impl Requirement {
    const ANY_AUTHENTICATED: &'static str = "AUTHENTICATED";

    /// Decide whether `actual` satisfies this requirement.
    pub fn admits(self, actual: Option<Role>) -> bool {
        match self {
            Requirement::Role(required) => crate::can_access(required, actual),
            Requirement::AnyAuthenticated => actual.is_some(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Role(role) => write!(f, "{}", role),
            Requirement::AnyAuthenticated => f.write_str(Self::ANY_AUTHENTICATED),
        }
    }
}

impl FromStr for Requirement {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(Self::ANY_AUTHENTICATED) {
            return Ok(Requirement::AnyAuthenticated);
        }
        s.parse::<Role>()
            .map(Requirement::Role)
            .map_err(|_| AuthzError::UnknownRequirement(s.to_string()))
    }
}

impl TryFrom<String> for Requirement {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Requirement> for String {
    fn from(value: Requirement) -> Self {
        value.to_string()
    }
}
