use audit::{actions, record_detached, AuditEvent};
use authz::{evaluate, Decision, Denial, Identity, RouteKind};
use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tower_sessions::Session;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::{error::ApiError, AppState};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const VERSION_HEADER: &str = "x-portal-version";

/// Route guard
///
/// Runs once per request, before any handler.
///
/// # Flow
///
/// 1. Read the `Session` the session layer put into the request extensions
/// 2. Resolve it to an [`Identity`] through the user crate (fresh every request)
/// 3. Ask [`authz::evaluate`] for a decision on the request path
/// 4. Allow: insert the identity into the request extensions and run the handler
/// 5. Deny: redirect (pages) or answer 401/403 (APIs)
///
/// # Security Notes
///
/// - A resolver error is treated as "no identity"; the guard never fails open
/// - A caller who is signed in but under-ranked is never sent to the login page
/// - Role denials are audited in the background and never delay the response
pub async fn route_guard(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let identity = match request.extensions().get::<Session>() {
        Some(session) => match state.users.sessions().resolve_identity(session).await {
            Ok(identity) => identity,
            Err(e) => {
                error!("Session resolution failed for {}: {}", path, e);
                None
            }
        },
        None => {
            warn!("No session layer in front of the route guard for {}", path);
            None
        }
    };

    match evaluate(&state.policy, &path, identity.as_ref()) {
        Decision::Allow => {
            debug!("Access allowed for {}", path);
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
        Decision::Deny(denial) => {
            if let Denial::InsufficientRole { required, actual } = denial {
                warn!(
                    "Access denied for {} with role {} (requires {})",
                    path, actual, required
                );
                record_detached(
                    state.audit.clone(),
                    AuditEvent::new(actions::ACCESS_DENIED, actual, "route")
                        .entity_id(path.clone())
                        .meta(serde_json::json!({ "required": required })),
                );
            } else {
                info!("Unauthenticated request for {}", path);
            }
            deny_response(&path, denial)
        }
    }
}

/// Translate a denial into the response for the kind of route that was hit.
pub fn deny_response(path: &str, denial: Denial) -> Response {
    match (RouteKind::of(path), denial) {
        (RouteKind::Page, Denial::Unauthenticated) => Redirect::temporary(&format!(
            "/login?callbackUrl={}",
            urlencoding::encode(path)
        ))
        .into_response(),
        (RouteKind::Page, Denial::InsufficientRole { actual, .. }) => {
            Redirect::temporary(actual.dashboard_route()).into_response()
        }
        (RouteKind::Api, denial) => ApiError::from(authz::AuthzError::from(denial)).into_response(),
    }
}

/// Request processing middleware hook
///
/// Tags every request with an id and logs how long it took.
pub async fn request_middleware(mut request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Ulid::new().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    debug!(
        "{} {} [{}] -> {} in {:?}",
        method,
        uri,
        request_id,
        response.status(),
        start.elapsed()
    );
    response
}

/// Response processing middleware hook
pub async fn response_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Rate limit key component for the caller.
///
/// With `trust_proxy_headers` set: first hop of `x-forwarded-for`, then
/// `x-real-ip`, then the peer address. Otherwise only the peer address is
/// used, since a direct client can put anything in those headers. Falls back
/// to `public` when nothing is known.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy_headers: bool) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let proxied = if trust_proxy_headers {
        header_value("x-forwarded-for").or_else(|| header_value("x-real-ip"))
    } else {
        None
    };

    proxied
        .or_else(|| peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| "public".to_string())
}

/// The caller's address as resolved by [`client_ip`].
///
/// The peer address comes from `ConnectInfo`, present when the server is
/// started with `into_make_service_with_connect_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            state.trust_proxy_headers,
        )))
    }
}

/// The identity the route guard admitted.
///
/// Rejects with 401 when the guard did not attach one, which only happens on
/// public routes.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or(ApiError::Unauthorized)
    }
}
