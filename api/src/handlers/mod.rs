pub mod announcements;
pub mod audit;
pub mod auth;
pub mod feedback;
pub mod health;
pub mod pages;
pub mod users;

use ::audit::AuditEvent;
use rate_limit::RateLimitPolicy;
use tracing::{error, warn};

use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

/// Count one request against `key` and refuse it with 429 once over `policy`.
///
/// Public write endpoints call this before touching anything else.
pub(crate) fn enforce_rate_limit(
    state: &AppState,
    key: &str,
    policy: &RateLimitPolicy,
) -> ApiResult<()> {
    let verdict = state.limiter.check(key, policy);
    if verdict.is_limited() {
        warn!("Rate limit hit for {}", key);
        return Err(ApiError::TooManyRequests {
            retry_after_secs: verdict.retry_after_secs(),
        });
    }
    Ok(())
}

/// Record `event` for a mutation that has already committed.
///
/// A recording failure is logged and otherwise ignored; the mutation stands.
pub(crate) async fn audit_committed(state: &AppState, event: AuditEvent) {
    let action = event.action.clone();
    if let Err(e) = state.audit.record(event).await {
        error!("Failed to record audit event {}: {}", action, e);
    }
}
