//! Static route policy table.
//!
//! Maps path prefixes to a [`Requirement`] or marks them public. The table is
//! loaded once at process start and is read-only afterwards, so lookups need
//! no locking.
//!
//! Matching is segment aware and the longest matching prefix wins:
//! `/dashboard/admin` overrides `/dashboard`, and `/admin` does not match
//! `/administrator`. The root prefix `/` only matches the root path.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{AuthzError, Result};
use crate::types::Requirement;

/// A protected path prefix and what it demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub prefix: String,
    pub requires: Requirement,
}

/// On-disk shape of the policy table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    public: Vec<String>,
    #[serde(default)]
    protected: Vec<PolicyEntry>,
}

/// Result of resolving a path against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// The longest matching prefix is protected.
    Protected(&'a PolicyEntry),
    /// The longest matching prefix is explicitly public.
    Public,
    /// No prefix matches.
    Unmatched,
}

/// The route policy table.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    protected: Vec<PolicyEntry>,
    public: Vec<String>,
}

const PORTAL_POLICY: &str = include_str!("../policy/portal.yaml");

impl RoutePolicy {
    /// Build a table from explicit entries, validating prefixes.
    pub fn new(protected: Vec<PolicyEntry>, public: Vec<String>) -> Result<Self> {
        let protected = protected
            .into_iter()
            .map(|entry| {
                Ok(PolicyEntry {
                    prefix: normalize_prefix(&entry.prefix)?,
                    requires: entry.requires,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let public = public
            .iter()
            .map(|prefix| normalize_prefix(prefix))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for prefix in protected
            .iter()
            .map(|entry| entry.prefix.as_str())
            .chain(public.iter().map(String::as_str))
        {
            if !seen.insert(prefix) {
                return Err(AuthzError::PolicyLoad(format!(
                    "prefix {} is listed more than once",
                    prefix
                )));
            }
        }

        Ok(Self { protected, public })
    }

    /// Parse a table from its YAML form.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: PolicyFile =
            serde_yaml::from_str(content).map_err(|e| AuthzError::PolicyLoad(e.to_string()))?;
        Self::new(file.protected, file.public)
    }

    /// Load a table from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::PolicyLoad(format!("failed to read {}: {}", path.display(), e))
        })?;
        let policy = Self::from_yaml(&content)?;
        info!(
            "Loaded route policy from {} ({} protected, {} public)",
            path.display(),
            policy.protected.len(),
            policy.public.len()
        );
        Ok(policy)
    }

    /// The built-in portal table.
    pub fn portal_default() -> Result<Self> {
        Self::from_yaml(PORTAL_POLICY)
    }

    /// The YAML source of the built-in portal table.
    pub fn portal_default_yaml() -> &'static str {
        PORTAL_POLICY
    }

    pub fn protected_entries(&self) -> &[PolicyEntry] {
        &self.protected
    }

    pub fn public_prefixes(&self) -> &[String] {
        &self.public
    }

    /// Resolve a request path to its governing entry.
    pub fn lookup(&self, path: &str) -> Lookup<'_> {
        let path = normalize_path(path);

        let protected = self
            .protected
            .iter()
            .filter(|entry| prefix_matches(&entry.prefix, path))
            .max_by_key(|entry| entry.prefix.len());
        let public = self
            .public
            .iter()
            .filter(|prefix| prefix_matches(prefix, path))
            .map(String::len)
            .max();

        let lookup = match (protected, public) {
            (Some(entry), Some(public_len)) if public_len > entry.prefix.len() => Lookup::Public,
            (Some(entry), _) => Lookup::Protected(entry),
            (None, Some(_)) => Lookup::Public,
            (None, None) => Lookup::Unmatched,
        };
        debug!("Route policy lookup for {}: {:?}", path, lookup);
        lookup
    }

    /// Verify that every routed path resolves to an explicit entry.
    ///
    /// Run once at startup with the router's path list; an unmatched path is
    /// a configuration error and the process must not start.
    pub fn check_coverage<'a, I>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let gaps: Vec<String> = paths
            .into_iter()
            .filter(|path| self.lookup(path) == Lookup::Unmatched)
            .map(str::to_string)
            .collect();

        if gaps.is_empty() {
            Ok(())
        } else {
            Err(AuthzError::PolicyGap(gaps))
        }
    }
}

fn normalize_prefix(prefix: &str) -> Result<String> {
    let prefix = prefix.trim();
    if !prefix.starts_with('/') {
        return Err(AuthzError::PolicyLoad(format!(
            "prefix {:?} must start with '/'",
            prefix
        )));
    }
    Ok(normalize_path(prefix).to_string())
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path == "/";
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
