use audit::{actions, AuditEvent};
use axum::{extract::State, http::StatusCode, Json};
use tracing::info;

use super::audit_committed;
use crate::{
    error::ApiResult,
    middleware_hooks::CurrentUser,
    models::{CreateUserRequest, SessionUserResponse},
    AppState,
};
use user::NewUser;

/// Create an account
/// POST /api/v1/admin/users
///
/// ADMIN accounts need a password; every other role signs in by link and
/// must not have one.
#[utoipa::path(
    post,
    path = "/api/v1/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = SessionUserResponse),
        (status = 400, description = "Invalid email, role or password", body = crate::error::ApiErrorResponse),
        (status = 409, description = "Email already registered", body = crate::error::ApiErrorResponse)
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<SessionUserResponse>)> {
    let mut new_user = NewUser::new(req.email, req.role);
    new_user.name = req.name;
    new_user.password = req.password;

    let created = state.users.database().create_user(new_user).await?;
    info!(
        "User {} ({}) created by {}",
        created.id, created.role, identity.id
    );

    audit_committed(
        &state,
        AuditEvent::new(actions::USER_CREATE, identity.role, "user")
            .entity_id(created.id.clone())
            .meta(serde_json::json!({ "role": created.role })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(created.into())))
}
