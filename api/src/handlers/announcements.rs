use audit::{actions, AuditEvent};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::info;
use ulid::Ulid;

use super::audit_committed;
use crate::{
    error::{ApiError, ApiResult},
    middleware_hooks::CurrentUser,
    models::{AnnouncementListResponse, CreateAnnouncementRequest},
    store::Announcement,
    AppState,
};

pub const ANNOUNCEMENT_PAGE_SIZE: usize = 20;

/// Announcements visible to the caller
/// GET /api/v1/announcements
#[utoipa::path(
    get,
    path = "/api/v1/announcements",
    responses(
        (status = 200, description = "Newest first", body = AnnouncementListResponse),
        (status = 401, description = "Not signed in", body = crate::error::ApiErrorResponse)
    ),
    tag = "announcements"
)]
pub async fn list_announcements(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> ApiResult<Json<AnnouncementListResponse>> {
    let announcements = state
        .store
        .announcements_for(identity.role, ANNOUNCEMENT_PAGE_SIZE)
        .await;
    Ok(Json(AnnouncementListResponse { announcements }))
}

/// Publish an announcement
/// POST /api/v1/admin/announcements
#[utoipa::path(
    post,
    path = "/api/v1/admin/announcements",
    request_body = CreateAnnouncementRequest,
    responses(
        (status = 201, description = "Published", body = Announcement),
        (status = 400, description = "Missing title or body", body = crate::error::ApiErrorResponse),
        (status = 403, description = "Requires ADMIN", body = crate::error::ApiErrorResponse)
    ),
    tag = "announcements"
)]
pub async fn create_announcement(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(req): Json<CreateAnnouncementRequest>,
) -> ApiResult<(StatusCode, Json<Announcement>)> {
    let title = req.title.trim();
    let body = req.body.trim();
    if title.is_empty() || body.is_empty() {
        return Err(ApiError::ValidationError(
            "title and body are required".to_string(),
        ));
    }

    let announcement = Announcement {
        id: Ulid::new().to_string(),
        title: title.to_string(),
        body: body.to_string(),
        audience: req.audience,
        author_id: identity.id.clone(),
        published_at: Utc::now(),
    };
    state.store.add_announcement(announcement.clone()).await;
    info!("Announcement {} published by {}", announcement.id, identity.id);

    audit_committed(
        &state,
        AuditEvent::new(actions::ANNOUNCEMENT_CREATE, identity.role, "announcement")
            .entity_id(announcement.id.clone())
            .meta(serde_json::json!({ "audience": announcement.audience })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(announcement)))
}
