use authz::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::{Announcement, Feedback};

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    #[schema(example = "healthy")]
    pub status: String,

    /// API version
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Current timestamp
    pub timestamp: DateTime<Utc>,

    /// Database connection status
    pub database: DatabaseHealth,
}

/// Database health status
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseHealth {
    /// Whether database is connected
    pub connected: bool,

    /// Connection status message
    pub message: String,
}

/// Admin password sign-in
#[derive(Debug, Deserialize, ToSchema)]
pub struct SignInRequest {
    #[schema(example = "admin@example.com")]
    pub email: String,
    pub password: String,
}

/// Request a one-time sign-in link
#[derive(Debug, Deserialize, ToSchema)]
pub struct MagicLinkRequest {
    #[schema(example = "trainee@example.com")]
    pub email: String,
}

/// Query string of a sign-in link
#[derive(Debug, Deserialize, ToSchema)]
pub struct MagicLinkVerifyQuery {
    pub token: String,
    pub email: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// The signed-in caller
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionUserResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    #[schema(value_type = String, example = "MENTOR")]
    pub role: Role,
    /// Where this caller lands after sign-in
    #[schema(example = "/dashboard/mentor")]
    pub dashboard: String,
}

impl From<user::PortalUser> for SessionUserResponse {
    fn from(user: user::PortalUser) -> Self {
        Self {
            dashboard: user.role.dashboard_route().to_string(),
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        }
    }
}

/// Announcement creation payload
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub body: String,
    /// Target role; omit to address everyone
    #[schema(value_type = Option<String>, example = "TRAINEE")]
    pub audience: Option<Role>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnnouncementListResponse {
    pub announcements: Vec<Announcement>,
}

/// Public customer feedback
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitFeedbackRequest {
    pub trainee_id: String,
    /// 1 to 5
    #[schema(example = 5)]
    pub rating: u8,
    pub comment: String,
    pub receipt_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedbackListResponse {
    pub feedback: Vec<Feedback>,
}

/// Admin user creation payload
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
    #[schema(value_type = String, example = "EMPLOYER")]
    pub role: Role,
    /// ADMIN accounts only
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuditQuery {
    /// Maximum entries to return, newest first
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditListResponse {
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<audit::AuditEntry>,
}
