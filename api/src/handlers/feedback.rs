//! Customer feedback about trainees
//!
//! Submission is public and rate limited per client address. Reading needs
//! MENTOR, exporting needs ADMIN; the route policy enforces both.

use audit::{actions, AuditEvent};
use authz::Role;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info};
use ulid::Ulid;

use super::{audit_committed, enforce_rate_limit};
use crate::{
    error::{ApiError, ApiResult},
    middleware_hooks::{ClientIp, CurrentUser},
    models::{FeedbackListResponse, SubmitFeedbackRequest},
    store::Feedback,
    AppState,
};

pub const FEEDBACK_PAGE_SIZE: usize = 50;
const MAX_COMMENT_CHARS: usize = 2000;

/// Submit feedback for a trainee
/// POST /api/v1/public/feedback
#[utoipa::path(
    post,
    path = "/api/v1/public/feedback",
    request_body = SubmitFeedbackRequest,
    responses(
        (status = 201, description = "Recorded", body = Feedback),
        (status = 400, description = "Invalid rating or comment", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No such trainee", body = crate::error::ApiErrorResponse),
        (status = 429, description = "Too many submissions from this address", body = crate::error::ApiErrorResponse)
    ),
    tag = "feedback"
)]
pub async fn submit_feedback(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<SubmitFeedbackRequest>,
) -> ApiResult<(StatusCode, Json<Feedback>)> {
    enforce_rate_limit(&state, &format!("feedback:{}", ip), &state.feedback_policy)?;

    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::ValidationError(
            "rating must be between 1 and 5".to_string(),
        ));
    }
    let comment = req.comment.trim();
    if comment.is_empty() || comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::ValidationError(format!(
            "comment must be 1 to {} characters",
            MAX_COMMENT_CHARS
        )));
    }

    match state.users.database().find_by_id(&req.trainee_id).await? {
        Some(trainee) if trainee.role == Role::Trainee && trainee.is_active => {}
        _ => return Err(ApiError::NotFound(format!("trainee {}", req.trainee_id))),
    }

    let feedback = Feedback {
        id: Ulid::new().to_string(),
        trainee_id: req.trainee_id,
        rating: req.rating,
        comment: comment.to_string(),
        receipt_code: req
            .receipt_code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty()),
        created_at: Utc::now(),
    };
    state.store.add_feedback(feedback.clone()).await;
    debug!("Feedback {} recorded for {}", feedback.id, feedback.trainee_id);

    Ok((StatusCode::CREATED, Json(feedback)))
}

/// Latest feedback
/// GET /api/v1/feedback
#[utoipa::path(
    get,
    path = "/api/v1/feedback",
    responses(
        (status = 200, description = "Newest first", body = FeedbackListResponse),
        (status = 403, description = "Requires MENTOR", body = crate::error::ApiErrorResponse)
    ),
    tag = "feedback"
)]
pub async fn list_feedback(State(state): State<AppState>) -> Json<FeedbackListResponse> {
    Json(FeedbackListResponse {
        feedback: state.store.feedback(Some(FEEDBACK_PAGE_SIZE)).await,
    })
}

/// Export all feedback as CSV
/// GET /api/v1/feedback/export
#[utoipa::path(
    get,
    path = "/api/v1/feedback/export",
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv"),
        (status = 403, description = "Requires ADMIN", body = crate::error::ApiErrorResponse)
    ),
    tag = "feedback"
)]
pub async fn export_feedback(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> ApiResult<Response> {
    let rows = state.store.feedback(None).await;

    let mut names: HashMap<String, String> = HashMap::new();
    for user in state.users.database().list_users().await? {
        let name = user.name.unwrap_or(user.email);
        names.insert(user.id, name);
    }

    let csv = render_csv(&rows, &names)?;
    info!("Feedback export of {} rows by {}", rows.len(), identity.id);

    audit_committed(
        &state,
        AuditEvent::new(actions::FEEDBACK_EXPORT, identity.role, "feedback")
            .meta(serde_json::json!({ "rows": rows.len() })),
    )
    .await;

    let filename = format!("feedback-{}.csv", Utc::now().format("%Y%m%d"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response())
}

fn render_csv(rows: &[Feedback], names: &HashMap<String, String>) -> ApiResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_error = |e: csv::Error| ApiError::InternalError(format!("CSV export failed: {}", e));

    writer
        .write_record(["traineeName", "rating", "comment", "receiptCode", "createdAt"])
        .map_err(csv_error)?;
    for row in rows {
        let name = names
            .get(&row.trainee_id)
            .map(String::as_str)
            .unwrap_or(row.trainee_id.as_str());
        let rating = row.rating.to_string();
        let created_at = row.created_at.to_rfc3339();
        writer
            .write_record([
                name,
                rating.as_str(),
                row.comment.as_str(),
                row.receipt_code.as_deref().unwrap_or(""),
                created_at.as_str(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ApiError::InternalError(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ApiError::InternalError(e.to_string()))
}
