use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use audit::{AuditLog, AuditLogConfig};
use authz::RoutePolicy;
use rate_limit::{FailureMode, RateLimitPolicy, RateLimiter};
use user::{auth::MagicLinkConfig, SessionConfig, UserManager};

use crate::{create_router, routed_paths, AppState};

pub const ROUTE_POLICY_FILE: &str = "route-policy.yaml";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Policy(#[from] authz::AuthzError),

    #[error(transparent)]
    User(#[from] user::UserError),

    #[error(transparent)]
    Audit(#[from] audit::AuditError),

    #[error(transparent)]
    RateLimit(#[from] rate_limit::RateLimitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Root of the sqlite database, audit log and log files
    pub data_path: PathBuf,
    /// Directory holding `route-policy.yaml`
    pub config_path: PathBuf,
    pub feedback_limit: u32,
    pub feedback_window_ms: u64,
    /// Sign-in and sign-in link requests per window, per address
    pub auth_limit: u32,
    pub auth_window_ms: u64,
    pub failure_mode: FailureMode,
    /// Read the client address from proxy headers. Only safe behind a proxy
    /// that overwrites them.
    pub trust_proxy_headers: bool,
    /// Only send the session cookie over HTTPS
    pub secure_cookie: bool,
    /// Origin used when building sign-in links
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            data_path: PathBuf::from("./data"),
            config_path: PathBuf::from("./config"),
            feedback_limit: RateLimitPolicy::FEEDBACK_LIMIT,
            feedback_window_ms: RateLimitPolicy::FEEDBACK_WINDOW_MS,
            auth_limit: RateLimitPolicy::AUTH_LIMIT,
            auth_window_ms: RateLimitPolicy::AUTH_WINDOW_MS,
            failure_mode: FailureMode::Closed,
            trust_proxy_headers: false,
            secure_cookie: false,
            base_url: "http://localhost:3030".to_string(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ServerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ServerError::Config(format!("{}={:?}: {}", name, raw, e))),
        _ => Ok(default),
    }
}

impl ApiConfig {
    /// Create a new API configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from the environment, after loading `.env`.
    pub fn from_env() -> Result<Self, ServerError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment from {}", path.display());
        }
        let defaults = Self::default();

        Ok(Self {
            host: env_parse("PORTAL_HOST", defaults.host)?,
            port: env_parse("PORTAL_PORT", defaults.port)?,
            data_path: env_parse("DATA_PATH", defaults.data_path)?,
            config_path: env_parse("CONFIGURATION_PATH", defaults.config_path)?,
            feedback_limit: env_parse("FEEDBACK_RATE_LIMIT", defaults.feedback_limit)?,
            feedback_window_ms: env_parse("FEEDBACK_RATE_WINDOW_MS", defaults.feedback_window_ms)?,
            auth_limit: env_parse("AUTH_RATE_LIMIT", defaults.auth_limit)?,
            auth_window_ms: env_parse("AUTH_RATE_WINDOW_MS", defaults.auth_window_ms)?,
            failure_mode: env_parse("RATE_LIMIT_FAILURE_MODE", defaults.failure_mode)?,
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?,
            secure_cookie: env_parse("SESSION_SECURE_COOKIE", defaults.secure_cookie)?,
            base_url: env_parse("PORTAL_BASE_URL", defaults.base_url)?,
        })
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_data_path(mut self, data_path: impl Into<PathBuf>) -> Self {
        self.data_path = data_path.into();
        self
    }

    pub fn feedback_policy(&self) -> Result<RateLimitPolicy, ServerError> {
        Ok(RateLimitPolicy::new(
            self.feedback_limit,
            self.feedback_window_ms,
        )?)
    }

    pub fn auth_policy(&self) -> Result<RateLimitPolicy, ServerError> {
        Ok(RateLimitPolicy::new(self.auth_limit, self.auth_window_ms)?)
    }

    pub fn route_policy_path(&self) -> PathBuf {
        self.config_path.join(ROUTE_POLICY_FILE)
    }
}

/// Load the route policy and prove it covers every routed path.
///
/// Reads `route-policy.yaml` from the configuration directory, falling back
/// to the built-in table when the file is absent.
pub fn load_route_policy(config_path: &Path) -> Result<RoutePolicy, ServerError> {
    let path = config_path.join(ROUTE_POLICY_FILE);
    let policy = if path.exists() {
        info!("Loading route policy from {}", path.display());
        RoutePolicy::load(&path)?
    } else {
        warn!(
            "No route policy at {}, using the built-in table",
            path.display()
        );
        RoutePolicy::portal_default()?
    };

    policy.check_coverage(routed_paths())?;
    info!(
        "Route policy covers all routes ({} protected prefixes, {} public)",
        policy.protected_entries().len(),
        policy.public_prefixes().len()
    );
    Ok(policy)
}

/// Build the shared state from configuration.
pub async fn build_state(config: &ApiConfig) -> Result<AppState, ServerError> {
    let policy = load_route_policy(&config.config_path)?;

    let users = UserManager::in_data_dir(
        &config.data_path,
        SessionConfig::default().with_secure(config.secure_cookie),
        MagicLinkConfig::default().with_base_url(config.base_url.clone()),
    )
    .await?;
    let audit = AuditLog::open(AuditLogConfig::in_data_dir(&config.data_path))?;
    let limiter = RateLimiter::in_memory().with_failure_mode(config.failure_mode);

    info!(
        "Rate limits: feedback {} per {} ms, sign-in {} per {} ms, store failures fail {}",
        config.feedback_limit,
        config.feedback_window_ms,
        config.auth_limit,
        config.auth_window_ms,
        config.failure_mode
    );
    if config.trust_proxy_headers {
        info!("Client addresses taken from proxy headers");
    }

    Ok(AppState::new(Arc::new(users), policy, Arc::new(audit))
        .with_rate_limit(limiter, config.feedback_policy()?)
        .with_auth_rate_limit(config.auth_policy()?)
        .with_trusted_proxy(config.trust_proxy_headers))
}

/// Periodically drop expired rate-limit buckets, sessions and sign-in tokens.
pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match state.limiter.purge_expired() {
                Ok(purged) if purged > 0 => info!("Purged {} expired rate-limit buckets", purged),
                Ok(_) => {}
                Err(e) => warn!("Rate-limit sweep failed: {}", e),
            }
            if let Err(e) = state.users.cleanup_expired().await {
                warn!("Session sweep failed: {}", e);
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

/// Start the API server with the given configuration
pub async fn start_server_with_config(config: ApiConfig) -> Result<(), ServerError> {
    let state = build_state(&config).await?;
    let session_layer = state
        .users
        .session_config()
        .layer(state.users.session_store().inner().clone());

    let sweeper = spawn_sweeper(state.clone());
    let app = create_router(state, session_layer);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on {}", addr);
    info!(
        "Swagger UI available at http://localhost:{}/api/v1/swagger",
        config.port
    );

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served?;

    Ok(())
}

/// Start the API server with configuration from the environment
pub async fn start_server() -> Result<(), ServerError> {
    start_server_with_config(ApiConfig::from_env()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 3030);
        assert_eq!(config.failure_mode, FailureMode::Closed);
        assert_eq!(config.feedback_policy().unwrap(), RateLimitPolicy::feedback());
        assert_eq!(config.auth_policy().unwrap(), RateLimitPolicy::auth());
        assert!(!config.trust_proxy_headers);
        assert_eq!(
            config.route_policy_path(),
            PathBuf::from("./config/route-policy.yaml")
        );
    }

    #[test]
    fn test_invalid_feedback_policy_refused() {
        let config = ApiConfig {
            feedback_limit: 0,
            ..ApiConfig::default()
        };
        assert!(matches!(
            config.feedback_policy(),
            Err(ServerError::RateLimit(_))
        ));
    }

    #[test]
    fn test_missing_policy_file_uses_default() {
        let dir = TempDir::new().unwrap();
        let policy = load_route_policy(dir.path()).unwrap();
        assert!(!policy.protected_entries().is_empty());
    }

    #[test]
    fn test_policy_gap_refuses_start() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(ROUTE_POLICY_FILE),
            "public:\n  - /\nprotected:\n  - prefix: /admin\n    requires: ADMIN\n",
        )
        .unwrap();

        match load_route_policy(dir.path()) {
            Err(ServerError::Policy(authz::AuthzError::PolicyGap(gaps))) => {
                assert!(gaps.contains(&"/api/v1/audit".to_string()));
                assert!(!gaps.contains(&"/admin".to_string()));
            }
            other => panic!("expected a policy gap, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_build_state_creates_files() {
        let dir = TempDir::new().unwrap();
        let config = ApiConfig {
            config_path: dir.path().join("config"),
            ..ApiConfig::default().with_data_path(dir.path())
        };

        let state = build_state(&config).await.unwrap();
        assert_eq!(state.auth_policy, RateLimitPolicy::auth());
        assert!(!state.trust_proxy_headers);
        assert!(state.users.verify_integrity().await.unwrap());
        assert!(dir.path().join("user-backend").join("portal_user.db").exists());
    }
}
