//! Fixed-window request limiter.
//!
//! Each key (for example `feedback:203.0.113.7`) owns a bucket holding a
//! counter and the instant its window ends. A request is admitted while the
//! counter is below the limit; once the window has passed the bucket starts
//! over. A request at exactly the window end still belongs to the old window.
//!
//! Limited requests do not advance the counter, so a caller hammering a
//! limited key cannot push its own reset further out.
//!
//! # Example
//!
//! ```rust
//! use rate_limit::{RateLimitPolicy, RateLimiter};
//!
//! let limiter = RateLimiter::in_memory();
//! let policy = RateLimitPolicy::new(2, 60_000).unwrap();
//! assert!(!limiter.is_rate_limited("login:alice", &policy));
//! assert!(!limiter.is_rate_limited("login:alice", &policy));
//! assert!(limiter.is_rate_limited("login:alice", &policy));
//! ```

pub mod clock;
pub mod error;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RateLimitError, Result};
pub use store::{Bucket, BucketStore, Hit, MemoryBucketStore};

/// Limit and window length for one class of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests admitted per window, at least 1
    pub limit: u32,
    /// Window length in milliseconds, at least 1
    pub window_ms: u64,
}

impl RateLimitPolicy {
    pub const FEEDBACK_LIMIT: u32 = 5;
    pub const FEEDBACK_WINDOW_MS: u64 = 15 * 60 * 1000;
    pub const AUTH_LIMIT: u32 = 5;
    pub const AUTH_WINDOW_MS: u64 = 60 * 1000;

    pub fn new(limit: u32, window_ms: u64) -> Result<Self> {
        if limit == 0 {
            return Err(RateLimitError::InvalidPolicy(
                "limit must be at least 1".to_string(),
            ));
        }
        if window_ms == 0 {
            return Err(RateLimitError::InvalidPolicy(
                "window must be at least 1ms".to_string(),
            ));
        }
        Ok(Self { limit, window_ms })
    }

    /// Five submissions per fifteen minutes.
    pub const fn feedback() -> Self {
        Self {
            limit: Self::FEEDBACK_LIMIT,
            window_ms: Self::FEEDBACK_WINDOW_MS,
        }
    }

    /// Five sign-in attempts per minute.
    pub const fn auth() -> Self {
        Self {
            limit: Self::AUTH_LIMIT,
            window_ms: Self::AUTH_WINDOW_MS,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::feedback()
    }
}

/// What to answer when the bucket store cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Treat the request as limited.
    #[default]
    Closed,
    /// Admit the request.
    Open,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Closed => f.write_str("closed"),
            FailureMode::Open => f.write_str("open"),
        }
    }
}

impl FromStr for FailureMode {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" => Ok(FailureMode::Closed),
            "open" => Ok(FailureMode::Open),
            other => Err(RateLimitError::InvalidPolicy(format!(
                "unknown failure mode {:?}, expected closed or open",
                other
            ))),
        }
    }
}

/// Answer for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed { remaining: u32, reset_in_ms: u64 },
    Limited { retry_after_ms: u64 },
}

impl Verdict {
    pub fn is_limited(&self) -> bool {
        matches!(self, Verdict::Limited { .. })
    }

    /// Seconds until the caller may retry, rounded up. Zero when allowed.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Verdict::Limited { retry_after_ms } => retry_after_ms.div_ceil(1000).max(1),
            Verdict::Allowed { .. } => 0,
        }
    }
}

/// Shared limiter handle. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn BucketStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            failure_mode: FailureMode::default(),
        }
    }

    /// Limiter over a process-local bucket table.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBucketStore::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Register one request for `key` and decide whether it is admitted.
    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> Verdict {
        let now = self.clock.now_ms();
        match self.store.hit(key, policy, now) {
            Ok(hit) => {
                let reset_in_ms = hit.bucket.window_expires_at.saturating_sub(now);
                if hit.limited {
                    debug!("Rate limited {} ({} in window)", key, hit.bucket.count);
                    // At the exact window end the wait is zero but the request
                    // is still refused, so never report less than 1ms.
                    Verdict::Limited {
                        retry_after_ms: reset_in_ms.saturating_add(1),
                    }
                } else {
                    Verdict::Allowed {
                        remaining: policy.limit.saturating_sub(hit.bucket.count),
                        reset_in_ms,
                    }
                }
            }
            Err(e) => {
                warn!("Rate limit store failed for {}: {}", key, e);
                match self.failure_mode {
                    FailureMode::Closed => Verdict::Limited {
                        retry_after_ms: policy.window_ms,
                    },
                    FailureMode::Open => {
                        warn!("Admitting {} without rate limiting (fail-open)", key);
                        Verdict::Allowed {
                            remaining: 0,
                            reset_in_ms: 0,
                        }
                    }
                }
            }
        }
    }

    /// `true` if the request must be refused.
    pub fn is_rate_limited(&self, key: &str, policy: &RateLimitPolicy) -> bool {
        self.check(key, policy).is_limited()
    }

    /// Drop expired buckets. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.store.purge_expired(self.clock.now_ms())?;
        if removed > 0 {
            debug!("Purged {} expired rate limit buckets", removed);
        }
        Ok(removed)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory()
    }
}
