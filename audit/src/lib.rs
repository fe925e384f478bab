//! Audit recording for sensitive portal actions.
//!
//! Callers hand an [`AuditEvent`] to an [`AuditRecorder`] after the action it
//! describes has committed. Recording is fire-and-forget from the caller's
//! point of view: [`record_detached`] spawns the write and only logs a
//! failure, so an unavailable log never rolls back the mutation.
//!
//! Entries are append-only. Nothing in this crate updates or deletes them.

pub mod entry;
pub mod error;
pub mod log;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

pub use entry::{AuditEntry, AuditEvent, GENESIS_HASH};
pub use error::{AuditError, Result};
pub use log::{AuditLog, AuditLogConfig, ChainVerification};

/// Action names used by the portal.
pub mod actions {
    pub const ANNOUNCEMENT_CREATE: &str = "announcement.create";
    pub const FEEDBACK_EXPORT: &str = "feedback.export";
    pub const USER_CREATE: &str = "user.create";
    pub const ACCESS_DENIED: &str = "access.denied";
    pub const AUTH_SIGN_IN: &str = "auth.sign_in";
}

/// Sink for audit events.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Append one event.
    async fn record(&self, event: AuditEvent) -> Result<()>;

    /// Newest entries first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Record `event` in the background.
///
/// Returns immediately. A failure is logged at `error` and otherwise
/// swallowed. Must be called from within a tokio runtime.
pub fn record_detached(recorder: Arc<dyn AuditRecorder>, event: AuditEvent) {
    tokio::spawn(async move {
        let action = event.action.clone();
        if let Err(e) = recorder.record(event).await {
            error!("Failed to record audit event {}: {}", action, e);
        }
    });
}

/// In-process recorder. Keeps the same hash chain as [`AuditLog`] but never
/// touches disk.
#[derive(Debug, Default)]
pub struct MemoryAuditRecorder {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, oldest first.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditRecorder {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries
            .last()
            .map(|entry| entry.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        entries.push(AuditEntry::seal(event, previous));
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}
