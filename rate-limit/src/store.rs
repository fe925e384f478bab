//! Bucket storage for the fixed-window limiter.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::RateLimitPolicy;

/// Per-key counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Requests admitted in the current window
    pub count: u32,
    /// Window end, milliseconds since the Unix epoch
    pub window_expires_at: u64,
}

impl Bucket {
    fn fresh(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            window_expires_at: now_ms.saturating_add(window_ms),
        }
    }
}

/// Outcome of registering one request against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub limited: bool,
    pub bucket: Bucket,
}

/// Storage for rate-limit buckets.
///
/// `hit` must be atomic per key: two concurrent hits on the same key observe
/// each other's increments. No ordering is required across keys.
pub trait BucketStore: Send + Sync {
    /// Register one request for `key` at `now_ms`.
    fn hit(&self, key: &str, policy: &RateLimitPolicy, now_ms: u64) -> Result<Hit>;

    /// Drop buckets whose window ended before `now_ms`. Returns how many were
    /// removed.
    fn purge_expired(&self, now_ms: u64) -> Result<usize>;
}

/// Process-local bucket table.
///
/// Created once at startup and shared by reference; lives until the process
/// exits. The `DashMap` entry guard serializes updates per key.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: DashMap<String, Bucket>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a single bucket.
    pub fn get(&self, key: &str) -> Option<Bucket> {
        self.buckets.get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl BucketStore for MemoryBucketStore {
    fn hit(&self, key: &str, policy: &RateLimitPolicy, now_ms: u64) -> Result<Hit> {
        let mut created = false;
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            created = true;
            Bucket::fresh(now_ms, policy.window_ms)
        });
        if created {
            return Ok(Hit {
                limited: false,
                bucket: *entry.value(),
            });
        }

        let bucket = entry.value_mut();
        if now_ms > bucket.window_expires_at {
            *bucket = Bucket::fresh(now_ms, policy.window_ms);
            return Ok(Hit {
                limited: false,
                bucket: *bucket,
            });
        }

        if bucket.count >= policy.limit {
            return Ok(Hit {
                limited: true,
                bucket: *bucket,
            });
        }

        bucket.count += 1;
        Ok(Hit {
            limited: false,
            bucket: *bucket,
        })
    }

    fn purge_expired(&self, now_ms: u64) -> Result<usize> {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.window_expires_at >= now_ms);
        Ok(before.saturating_sub(self.buckets.len()))
    }
}
