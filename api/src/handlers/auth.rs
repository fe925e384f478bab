//! Sign-in, sign-out and the current session

use audit::{actions, AuditEvent};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use axum_login::AuthnBackend;
use tower_sessions::Session;
use tracing::{error, info, warn};

use super::{audit_committed, enforce_rate_limit};
use crate::{
    error::{ApiError, ApiResult},
    middleware_hooks::{ClientIp, CurrentUser},
    models::{
        MagicLinkRequest, MagicLinkVerifyQuery, MessageResponse, SessionUserResponse,
        SignInRequest,
    },
    AppState,
};
use user::{AuthenticationMethod, Credentials, PortalUser};

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn start_session(
    state: &AppState,
    session: &Session,
    ip: &str,
    headers: &HeaderMap,
    user: &PortalUser,
    method: AuthenticationMethod,
) -> ApiResult<()> {
    state
        .users
        .sessions()
        .create_session(
            session,
            user,
            method,
            Some(ip.to_string()),
            user_agent(headers),
        )
        .await?;

    audit_committed(
        state,
        AuditEvent::new(actions::AUTH_SIGN_IN, user.role, "user")
            .entity_id(user.id.clone())
            .meta(serde_json::json!({ "method": method })),
    )
    .await;
    Ok(())
}

/// Admin password sign-in
/// POST /api/v1/auth/sign-in
#[utoipa::path(
    post,
    path = "/api/v1/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionUserResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiErrorResponse),
        (status = 429, description = "Too many attempts from this address", body = crate::error::ApiErrorResponse)
    ),
    tag = "auth"
)]
pub async fn sign_in(
    State(state): State<AppState>,
    session: Session,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Json(req): Json<SignInRequest>,
) -> ApiResult<Json<SessionUserResponse>> {
    enforce_rate_limit(&state, &format!("sign-in:{}", ip), &state.auth_policy)?;

    let credentials = Credentials::Password {
        email: req.email,
        password: req.password,
        ip_address: Some(ip.clone()),
    };

    let user = state
        .users
        .auth_backend()
        .authenticate(credentials)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    start_session(
        &state,
        &session,
        &ip,
        &headers,
        &user,
        AuthenticationMethod::Password,
    )
    .await?;
    info!("Admin {} signed in", user.id);

    Ok(Json(user.into()))
}

/// Request a one-time sign-in link
/// POST /api/v1/auth/magic-link
///
/// Always answers 202 so the response does not reveal whether the email
/// belongs to an account.
#[utoipa::path(
    post,
    path = "/api/v1/auth/magic-link",
    request_body = MagicLinkRequest,
    responses(
        (status = 202, description = "Link issued if the account exists", body = MessageResponse),
        (status = 400, description = "Malformed email", body = crate::error::ApiErrorResponse),
        (status = 429, description = "Too many requests from this address", body = crate::error::ApiErrorResponse)
    ),
    tag = "auth"
)]
pub async fn request_magic_link(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<MagicLinkRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    enforce_rate_limit(&state, &format!("magic-link:{}", ip), &state.auth_policy)?;

    let email = user::normalize_email(&req.email)?;

    if let Err(e) = state
        .users
        .magic_links()
        .issue(state.users.database(), &email)
        .await
    {
        error!("Failed to issue sign-in link: {}", e);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If an account exists for this email, a sign-in link is on its way"
                .to_string(),
        }),
    ))
}

/// Redeem a sign-in link
/// GET /api/v1/auth/magic-link/verify
#[utoipa::path(
    get,
    path = "/api/v1/auth/magic-link/verify",
    params(
        ("token" = String, Query, description = "Token from the link"),
        ("email" = String, Query, description = "Email the link was issued to")
    ),
    responses(
        (status = 307, description = "Redirect to the caller's dashboard, or to the login page when the link is invalid or used")
    ),
    tag = "auth"
)]
pub async fn verify_magic_link(
    State(state): State<AppState>,
    session: Session,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Query(query): Query<MagicLinkVerifyQuery>,
) -> ApiResult<Response> {
    let credentials = Credentials::MagicLink {
        email: query.email,
        token: query.token,
        ip_address: Some(ip.clone()),
    };

    let Some(user) = state.users.auth_backend().authenticate(credentials).await? else {
        warn!("Sign-in link rejected");
        return Ok(Redirect::temporary("/login?error=invalid_link").into_response());
    };

    start_session(
        &state,
        &session,
        &ip,
        &headers,
        &user,
        AuthenticationMethod::MagicLink,
    )
    .await?;
    info!("User {} signed in with a sign-in link", user.id);

    Ok(Redirect::temporary(user.role.dashboard_route()).into_response())
}

/// Logout
/// POST /api/v1/auth/logout
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 200, description = "Session destroyed", body = MessageResponse)),
    tag = "auth"
)]
pub async fn logout(session: Session) -> ApiResult<Json<MessageResponse>> {
    user::auth::SessionManager::destroy_session(&session).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Get current user info
/// GET /api/v1/auth/me
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "The signed-in caller", body = SessionUserResponse),
        (status = 401, description = "Not signed in", body = crate::error::ApiErrorResponse)
    ),
    tag = "auth"
)]
pub async fn get_current_user(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> ApiResult<Json<SessionUserResponse>> {
    let user = state
        .users
        .database()
        .find_by_id(&identity.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(user.into()))
}
