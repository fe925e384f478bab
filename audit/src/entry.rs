use authz::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash that anchors the first entry of a fresh log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A sensitive action about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: String,
    pub actor_role: Role,
    pub entity: String,
    pub entity_id: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, actor_role: Role, entity: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor_role,
            entity: entity.into(),
            entity_id: None,
            meta: None,
        }
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// One immutable line of the audit log.
///
/// Carries the actor's role, never a session token or credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ULID of the entry
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Dotted action name, see [`crate::actions`]
    pub action: String,
    pub actor_role: Role,
    /// Kind of object acted on (`announcement`, `feedback`, `route`, ...)
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Hash of the entry written before this one
    pub previous_hash: String,
    /// SHA-256 over every other field
    pub entry_hash: String,
}

impl AuditEntry {
    /// Seal `event` onto the chain after `previous_hash`.
    pub fn seal(event: AuditEvent, previous_hash: String) -> Self {
        let mut entry = Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            action: event.action,
            actor_role: event.actor_role,
            entity: event.entity,
            entity_id: event.entity_id,
            meta: event.meta,
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        entry
    }

    fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(bytes);
            // unit separator keeps adjacent fields from running together
            hasher.update([0x1f_u8]);
        };

        field(self.id.as_bytes());
        field(self.timestamp.to_rfc3339().as_bytes());
        field(self.action.as_bytes());
        field(self.actor_role.as_str().as_bytes());
        field(self.entity.as_bytes());
        field(self.entity_id.as_deref().unwrap_or_default().as_bytes());
        match &self.meta {
            Some(meta) => field(meta.to_string().as_bytes()),
            None => field(b""),
        }
        field(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// `true` if `entry_hash` matches the entry's content.
    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.calculate_hash()
    }
}
