use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::ApiResult,
    models::{AuditListResponse, AuditQuery},
    AppState,
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Recent audit entries
/// GET /api/v1/audit
#[utoipa::path(
    get,
    path = "/api/v1/audit",
    params(("limit" = Option<usize>, Query, description = "Maximum entries, default 100")),
    responses(
        (status = 200, description = "Newest first", body = AuditListResponse),
        (status = 403, description = "Requires ADMIN", body = crate::error::ApiErrorResponse)
    ),
    tag = "audit"
)]
pub async fn list_audit_entries(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<AuditListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state.audit.recent(limit).await?;
    Ok(Json(AuditListResponse { entries }))
}
