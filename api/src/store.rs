//! In-memory portal content.
//!
//! Announcements and customer feedback live here for the lifetime of the
//! process. Reads take a shared lock, writes an exclusive one.

use authz::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

/// A notice shown on dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Role the notice targets, or everyone when absent
    #[schema(value_type = Option<String>, example = "TRAINEE")]
    pub audience: Option<Role>,
    pub author_id: String,
    pub published_at: DateTime<Utc>,
}

impl Announcement {
    /// Whether a caller with `role` should see this notice.
    pub fn visible_to(&self, role: Role) -> bool {
        match self.audience {
            None => true,
            Some(audience) => role == audience || role == Role::Admin,
        }
    }
}

/// A customer rating of a trainee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Feedback {
    pub id: String,
    pub trainee_id: String,
    /// 1 to 5
    pub rating: u8,
    pub comment: String,
    pub receipt_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PortalStore {
    announcements: RwLock<Vec<Announcement>>,
    feedback: RwLock<Vec<Feedback>>,
}

impl PortalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_announcement(&self, announcement: Announcement) {
        self.announcements.write().await.push(announcement);
    }

    /// Newest first, at most `limit`, filtered to what `role` may see.
    pub async fn announcements_for(&self, role: Role, limit: usize) -> Vec<Announcement> {
        let announcements = self.announcements.read().await;
        let mut visible: Vec<Announcement> = announcements
            .iter()
            .filter(|a| a.visible_to(role))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        visible.truncate(limit);
        visible
    }

    pub async fn add_feedback(&self, feedback: Feedback) {
        self.feedback.write().await.push(feedback);
    }

    /// Newest first. `None` returns everything.
    pub async fn feedback(&self, limit: Option<usize>) -> Vec<Feedback> {
        let mut rows = self.feedback.read().await.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        rows
    }
}
