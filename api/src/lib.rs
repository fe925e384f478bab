use axum::{
    middleware,
    routing::{get, post, MethodRouter},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{SessionManagerLayer, SessionStore};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use audit::AuditRecorder;
use authz::RoutePolicy;
use rate_limit::{RateLimitPolicy, RateLimiter};
use user::UserManager;

pub mod error;
pub mod handlers;
pub mod middleware_hooks;
pub mod models;
pub mod server;
pub mod store;

#[cfg(test)]
mod middleware_hooks_tests;

pub use server::{spawn_sweeper, start_server, start_server_with_config, ApiConfig};
use store::PortalStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserManager>,
    pub policy: Arc<RoutePolicy>,
    pub limiter: RateLimiter,
    pub feedback_policy: RateLimitPolicy,
    /// Applies to password sign-in and sign-in link requests
    pub auth_policy: RateLimitPolicy,
    /// Take the client address from `x-forwarded-for` / `x-real-ip`
    pub trust_proxy_headers: bool,
    pub audit: Arc<dyn AuditRecorder>,
    pub store: Arc<PortalStore>,
}

impl AppState {
    /// State with an in-memory limiter, the default limits and proxy headers
    /// ignored.
    pub fn new(users: Arc<UserManager>, policy: RoutePolicy, audit: Arc<dyn AuditRecorder>) -> Self {
        Self {
            users,
            policy: Arc::new(policy),
            limiter: RateLimiter::in_memory(),
            feedback_policy: RateLimitPolicy::feedback(),
            auth_policy: RateLimitPolicy::auth(),
            trust_proxy_headers: false,
            audit,
            store: Arc::new(PortalStore::new()),
        }
    }

    pub fn with_rate_limit(mut self, limiter: RateLimiter, feedback_policy: RateLimitPolicy) -> Self {
        self.limiter = limiter;
        self.feedback_policy = feedback_policy;
        self
    }

    pub fn with_auth_rate_limit(mut self, auth_policy: RateLimitPolicy) -> Self {
        self.auth_policy = auth_policy;
        self
    }

    pub fn with_trusted_proxy(mut self, trust_proxy_headers: bool) -> Self {
        self.trust_proxy_headers = trust_proxy_headers;
        self
    }
}

pub const SWAGGER_PATH: &str = "/api/v1/swagger";
pub const OPENAPI_PATH: &str = "/api/v1/openapi.json";

/// API routes and their handlers.
///
/// The router is built from this table and the startup coverage check reads
/// its paths, so a route cannot be mounted without the policy seeing it.
pub fn api_routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    vec![
        ("/api/v1/health", get(handlers::health::health_check)),
        // Sign-in and session
        ("/api/v1/auth/sign-in", post(handlers::auth::sign_in)),
        (
            "/api/v1/auth/magic-link",
            post(handlers::auth::request_magic_link),
        ),
        (
            "/api/v1/auth/magic-link/verify",
            get(handlers::auth::verify_magic_link),
        ),
        ("/api/v1/auth/logout", post(handlers::auth::logout)),
        ("/api/v1/auth/me", get(handlers::auth::get_current_user)),
        // Content
        (
            "/api/v1/announcements",
            get(handlers::announcements::list_announcements),
        ),
        (
            "/api/v1/admin/announcements",
            post(handlers::announcements::create_announcement),
        ),
        ("/api/v1/admin/users", post(handlers::users::create_user)),
        (
            "/api/v1/public/feedback",
            post(handlers::feedback::submit_feedback),
        ),
        ("/api/v1/feedback", get(handlers::feedback::list_feedback)),
        (
            "/api/v1/feedback/export",
            get(handlers::feedback::export_feedback),
        ),
        ("/api/v1/audit", get(handlers::audit::list_audit_entries)),
    ]
}

/// Page routes: `/dashboard` plus one shell per [`handlers::pages::PAGE_PATHS`] entry.
pub fn page_routes() -> Vec<(&'static str, MethodRouter<AppState>)> {
    std::iter::once(("/dashboard", get(handlers::pages::dashboard)))
        .chain(
            handlers::pages::PAGE_PATHS
                .iter()
                .map(|path| (*path, get(handlers::pages::section))),
        )
        .collect()
}

/// Every path the router serves, for the startup policy coverage check.
pub fn routed_paths() -> Vec<&'static str> {
    page_routes()
        .into_iter()
        .chain(api_routes())
        .map(|(path, _)| path)
        .chain([SWAGGER_PATH, OPENAPI_PATH])
        .collect()
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::sign_in,
        handlers::auth::request_magic_link,
        handlers::auth::verify_magic_link,
        handlers::auth::logout,
        handlers::auth::get_current_user,
        handlers::announcements::list_announcements,
        handlers::announcements::create_announcement,
        handlers::feedback::submit_feedback,
        handlers::feedback::list_feedback,
        handlers::feedback::export_feedback,
        handlers::audit::list_audit_entries,
        handlers::users::create_user,
    ),
    components(
        schemas(
            models::HealthResponse,
            models::DatabaseHealth,
            models::SignInRequest,
            models::MagicLinkRequest,
            models::MessageResponse,
            models::SessionUserResponse,
            models::CreateAnnouncementRequest,
            models::AnnouncementListResponse,
            models::SubmitFeedbackRequest,
            models::FeedbackListResponse,
            models::CreateUserRequest,
            models::AuditListResponse,
            store::Announcement,
            store::Feedback,
            error::ApiErrorResponse,
            error::ErrorDetail,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Sign-in and sessions"),
        (name = "announcements", description = "Dashboard announcements"),
        (name = "feedback", description = "Customer feedback"),
        (name = "audit", description = "Audit trail"),
        (name = "users", description = "Account administration"),
    ),
    info(
        title = "Portal API",
        version = "0.1.0",
        description = "Role-gated API for the training portal",
    ),
)]
pub struct ApiDoc;

/// Create the main router with all routes and middleware.
///
/// Layers, innermost first: route guard, request/response hooks, sessions,
/// then tracing and CORS. The session layer must wrap the guard so the guard
/// finds a `Session` in the request extensions.
pub fn create_router<Store>(state: AppState, session_layer: SessionManagerLayer<Store>) -> Router
where
    Store: SessionStore + Clone,
{
    let mut router = Router::new();
    for (path, handler) in page_routes().into_iter().chain(api_routes()) {
        router = router.route(path, handler);
    }

    router
        .merge(SwaggerUi::new(SWAGGER_PATH).url(OPENAPI_PATH, ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_hooks::route_guard,
        ))
        .layer(middleware::from_fn(middleware_hooks::request_middleware))
        .layer(middleware::from_fn(middleware_hooks::response_middleware))
        .layer(session_layer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
