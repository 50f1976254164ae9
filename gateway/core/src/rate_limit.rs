//! Request Rate Limiting
//!
//! Streaming sessions re-query the ledger every time their topic changes, so
//! each loop iteration (and each plain document request) spends one unit of
//! the client's budget. This module provides:
//!
//! - The [`RateLimiter`] contract the dispatcher and streaming engine consume
//! - [`KeyedRateLimiter`], an in-process token bucket per request key
//!
//! # Design
//!
//! Each key owns a token bucket:
//! - Tokens are added at `per_hour` tokens per hour
//! - Tokens accumulate up to `burst`
//! - A request consumes `cost` tokens
//! - When tokens are exhausted the request is reported as limited; callers
//!   never wait for a refill
//!
//! Token counts are kept in integer sub-units (one token = 3 600 000 units)
//! so that refill per elapsed millisecond is exact for any hourly rate.
//!
//! A bucket that has refilled to `burst` is indistinguishable from a new one,
//! so the keyed limiter drops full buckets every [`CLEANUP_INTERVAL`] checks.
//! Keys come from client-supplied headers and would otherwise grow forever.
//!
//! # Usage
//!
//! ```
//! use gateway_core::rate_limit::{KeyedRateLimiter, RateLimitConfig};
//!
//! let limiter = KeyedRateLimiter::new(
//!     RateLimitConfig::new().with_per_hour(3600).with_burst(100),
//! );
//! let status = limiter.check("203.0.113.7", 1);
//! assert!(!status.limited);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sub-units per token: one token per hour refills one unit per millisecond
const UNITS_PER_TOKEN: u64 = 3_600_000;

/// Checks between sweeps of full buckets in [`KeyedRateLimiter`]
pub const CLEANUP_INTERVAL: u64 = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for request rate limiting
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Steady-state requests allowed per hour per key
    pub per_hour: u32,

    /// Burst size - maximum tokens that can accumulate
    pub burst: u32,

    /// Whether to enable rate limiting (can be disabled for testing)
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_hour: 3600,
            burst: 100,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hourly rate
    #[must_use]
    pub fn with_per_hour(mut self, per_hour: u32) -> Self {
        self.per_hour = per_hour;
        self
    }

    /// Set the burst size
    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    /// Enable or disable rate limiting
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Create a disabled configuration (for testing)
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

// =============================================================================
// Contract
// =============================================================================

/// Errors reported by a rate limiter backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    /// The backing store could not be reached or answered garbage
    #[error("rate limiter backend unavailable: {0}")]
    Backend(String),
}

/// Verdict for a single rate limit check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request must be refused
    pub limited: bool,
    /// Whole tokens left in the bucket after this check
    pub remaining: u32,
}

impl RateLimitStatus {
    /// A verdict that lets the request through
    #[must_use]
    pub fn allowed(remaining: u32) -> Self {
        Self {
            limited: false,
            remaining,
        }
    }
}

/// `RateLimit(key, cost)` contract
///
/// Implementations may call out to a shared store; callers treat the answer
/// as eventually consistent and never retry.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Spend `cost` units of the budget identified by `key`
    async fn rate_limit(&self, key: &str, cost: u32) -> Result<RateLimitStatus, LimiterError>;
}

// =============================================================================
// Token Bucket
// =============================================================================

#[derive(Debug)]
struct BucketState {
    units: u64,
    last_refill: Instant,
}

/// Token bucket for a single key
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
    total_requests: AtomicU64,
    limited_requests: AtomicU64,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let units = u64::from(config.burst) * UNITS_PER_TOKEN;
        Self {
            config,
            state: Mutex::new(BucketState {
                units,
                last_refill: Instant::now(),
            }),
            total_requests: AtomicU64::new(0),
            limited_requests: AtomicU64::new(0),
        }
    }

    /// Try to take `cost` tokens out of the bucket
    pub fn try_consume(&self, cost: u32) -> RateLimitStatus {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        self.refill(&mut state);

        let needed = u64::from(cost) * UNITS_PER_TOKEN;
        if state.units >= needed {
            state.units -= needed;
            RateLimitStatus::allowed(whole_tokens(state.units))
        } else {
            self.limited_requests.fetch_add(1, Ordering::Relaxed);
            RateLimitStatus {
                limited: true,
                remaining: whole_tokens(state.units),
            }
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_ms = u64::try_from(now.duration_since(state.last_refill).as_millis())
            .unwrap_or(u64::MAX);

        if elapsed_ms == 0 {
            return;
        }

        let added = u64::from(self.config.per_hour).saturating_mul(elapsed_ms);
        let max_units = u64::from(self.config.burst) * UNITS_PER_TOKEN;
        state.units = state.units.saturating_add(added).min(max_units);
        state.last_refill = now;
    }

    /// True once the bucket has refilled to `burst`
    #[must_use]
    pub fn is_full(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.units >= u64::from(self.config.burst) * UNITS_PER_TOKEN
    }

    /// Whole tokens currently available
    #[must_use]
    pub fn available_tokens(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        whole_tokens(state.units)
    }

    /// Total checks made against this bucket
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Checks that were refused
    #[must_use]
    pub fn limited_requests(&self) -> u64 {
        self.limited_requests.load(Ordering::Relaxed)
    }
}

fn whole_tokens(units: u64) -> u32 {
    u32::try_from(units / UNITS_PER_TOKEN).unwrap_or(u32::MAX)
}

// =============================================================================
// Keyed Rate Limiter
// =============================================================================

/// In-process rate limiter keeping one bucket per request key
pub struct KeyedRateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, TokenBucket>>,
    checks: AtomicU64,
}

impl KeyedRateLimiter {
    /// Create a new limiter
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Synchronous check used by the [`RateLimiter`] implementation
    pub fn check(&self, key: &str, cost: u32) -> RateLimitStatus {
        if !self.config.enabled {
            return RateLimitStatus::allowed(self.config.burst);
        }

        let seen = self.checks.fetch_add(1, Ordering::Relaxed);
        if seen % CLEANUP_INTERVAL == CLEANUP_INTERVAL - 1 {
            self.cleanup_idle();
        }

        {
            let buckets = self.buckets.read();
            if let Some(bucket) = buckets.get(key) {
                return bucket.try_consume(cost);
            }
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key = %key, "Created rate limit bucket");
            TokenBucket::new(self.config.clone())
        });
        bucket.try_consume(cost)
    }

    /// Drop buckets that have refilled to full, returning how many went
    ///
    /// A dropped key starts again from a fresh full bucket, which is the state
    /// it would be in anyway.
    pub fn cleanup_idle(&self) -> usize {
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_full());
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = buckets.len(),
                "Evicted idle rate limit buckets"
            );
        }
        removed
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.read().len()
    }

    /// Aggregate metrics across all keys
    #[must_use]
    pub fn metrics(&self) -> RateLimitMetrics {
        let buckets = self.buckets.read();
        let mut metrics = RateLimitMetrics {
            tracked_keys: buckets.len(),
            ..RateLimitMetrics::default()
        };
        for bucket in buckets.values() {
            metrics.total_requests += bucket.total_requests();
            metrics.limited_requests += bucket.limited_requests();
        }
        metrics
    }

    /// Forget every key
    pub fn clear(&self) {
        self.buckets.write().clear();
    }
}

impl std::fmt::Debug for KeyedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedRateLimiter")
            .field("config", &self.config)
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

impl Default for KeyedRateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl RateLimiter for KeyedRateLimiter {
    async fn rate_limit(&self, key: &str, cost: u32) -> Result<RateLimitStatus, LimiterError> {
        Ok(self.check(key, cost))
    }
}

/// Aggregate metrics for the keyed limiter
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitMetrics {
    /// Keys with a live bucket
    pub tracked_keys: usize,
    /// Checks across all keys
    pub total_requests: u64,
    /// Refused checks across all keys
    pub limited_requests: u64,
}

// =============================================================================
// Tests
// =============================================================================
