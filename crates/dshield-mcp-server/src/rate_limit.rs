//! Hierarchical rate limiting.
//!
//! Three tiers evaluated in order, any rejection short-circuiting: a token
//! bucket per API key (blocked-key set overrides allow), a sliding window
//! per connection, and a global sliding window over the whole process.
//! Rejections surface as `rate_limited` with a suggested wait.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::{info, warn};

use dshield_mcp_core::{SlidingWindow, TokenBucket};
use dshield_mcp_protocol::McpError;

/// Sustained rate handed to keys that were never explicitly created.
pub const UNKNOWN_KEY_RPM: u32 = 10;

/// Default per-connection budget.
pub const CONNECTION_RPM: u32 = 100;

/// Default process-wide budget.
pub const GLOBAL_RPM: u32 = 1000;

/// Stats for one API key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStats {
    /// Sustained rate.
    pub requests_per_minute: u32,
    /// Burst capacity.
    pub burst_size: u32,
    /// Tokens currently available.
    pub current_tokens: f64,
    /// Suggested wait before the next request, in milliseconds.
    pub wait_time_ms: u64,
    /// Whether the key is blocked.
    pub is_blocked: bool,
}

/// Per-API-key token buckets with a blocked-key override.
#[derive(Debug, Default)]
pub struct ApiKeyRateLimiter {
    buckets: DashMap<String, Arc<TokenBucket>>,
    blocked: DashSet<String>,
}

impl ApiKeyRateLimiter {
    /// Empty limiter; unknown keys get the conservative default bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the bucket for a key and clear any block.
    pub fn create_key(&self, key: &str, requests_per_minute: u32) {
        self.buckets
            .insert(key.to_string(), Arc::new(TokenBucket::new(requests_per_minute)));
        self.blocked.remove(key);
        info!(key, requests_per_minute, "created rate limiter for API key");
    }

    /// Forget a key entirely.
    pub fn remove_key(&self, key: &str) {
        self.buckets.remove(key);
        self.blocked.remove(key);
    }

    /// Deny all requests for a key until unblocked.
    pub fn block_key(&self, key: &str, reason: &str) {
        self.blocked.insert(key.to_string());
        warn!(key, reason, "API key blocked");
    }

    /// Lift a block.
    pub fn unblock_key(&self, key: &str) {
        self.blocked.remove(key);
        info!(key, "API key unblocked");
    }

    /// Check one request against the key's bucket.
    pub fn check(&self, key: &str) -> Result<(), McpError> {
        if self.blocked.contains(key) {
            warn!(key, "request denied for blocked API key");
            return Err(McpError::rate_limited(60_000));
        }
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(UNKNOWN_KEY_RPM)))
            .clone();
        if bucket.try_acquire() {
            Ok(())
        } else {
            let wait = bucket.wait_time();
            warn!(key, wait_ms = wait.as_millis() as u64, "API key rate limit exceeded");
            Err(McpError::rate_limited(duration_ms(wait)))
        }
    }

    /// Stats for one key, `None` when the key has never been seen.
    pub fn key_stats(&self, key: &str) -> Option<KeyStats> {
        let bucket = self.buckets.get(key)?;
        Some(KeyStats {
            requests_per_minute: bucket.requests_per_minute(),
            burst_size: bucket.burst_size(),
            current_tokens: bucket.current_tokens(),
            wait_time_ms: duration_ms(bucket.wait_time()),
            is_blocked: self.blocked.contains(key),
        })
    }
}

/// Per-connection sliding windows.
#[derive(Debug)]
pub struct ConnectionRateLimiter {
    windows: DashMap<String, Arc<SlidingWindow>>,
    limit: u32,
}

impl ConnectionRateLimiter {
    /// Limiter with `limit` requests per minute per connection.
    pub fn new(limit: u32) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
        }
    }

    /// Check one request for a connection.
    pub fn check(&self, connection_id: &str) -> Result<(), McpError> {
        let window = self
            .windows
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(SlidingWindow::per_minute(self.limit)))
            .clone();
        if window.try_acquire() {
            Ok(())
        } else {
            let wait = window.wait_time();
            warn!(
                connection_id,
                wait_ms = wait.as_millis() as u64,
                "connection rate limit exceeded"
            );
            Err(McpError::rate_limited(duration_ms(wait)))
        }
    }

    /// Drop a closed connection's window.
    pub fn remove_connection(&self, connection_id: &str) {
        self.windows.remove(connection_id);
    }
}

/// The process-wide ceiling.
#[derive(Debug)]
pub struct GlobalRateLimiter {
    window: SlidingWindow,
}

impl GlobalRateLimiter {
    /// Limiter with `limit` requests per minute across all connections.
    pub fn new(limit: u32) -> Self {
        Self {
            window: SlidingWindow::per_minute(limit),
        }
    }

    /// Check one request against the global window.
    pub fn check(&self) -> Result<(), McpError> {
        if self.window.try_acquire() {
            Ok(())
        } else {
            let wait = self.window.wait_time();
            warn!(wait_ms = wait.as_millis() as u64, "global rate limit exceeded");
            Err(McpError::rate_limited(duration_ms(wait)))
        }
    }

    /// Requests currently inside the global window.
    pub fn current_count(&self) -> usize {
        self.window.current_count()
    }
}

/// The three tiers composed in evaluation order.
#[derive(Debug)]
pub struct RateLimitStack {
    /// Tier 1: per API key.
    pub api_keys: ApiKeyRateLimiter,
    /// Tier 2: per connection.
    pub connections: ConnectionRateLimiter,
    /// Tier 3: global.
    pub global: GlobalRateLimiter,
    /// Rate handed to keys registered through [`RateLimitStack::register_key`].
    default_key_rpm: u32,
}

impl RateLimitStack {
    /// Stack with the given per-key default and standard tier limits.
    pub fn new(key_rpm: u32) -> Self {
        Self::with_limits(key_rpm, CONNECTION_RPM, GLOBAL_RPM)
    }

    /// Stack with explicit limits for every tier.
    pub fn with_limits(key_rpm: u32, connection_rpm: u32, global_rpm: u32) -> Self {
        Self {
            api_keys: ApiKeyRateLimiter::new(),
            connections: ConnectionRateLimiter::new(connection_rpm),
            global: GlobalRateLimiter::new(global_rpm),
            default_key_rpm: key_rpm,
        }
    }

    /// Give an authenticated key its configured bucket.
    pub fn register_key(&self, key: &str) {
        self.api_keys.create_key(key, self.default_key_rpm);
    }

    /// Evaluate all tiers in order; the first rejection wins. Connections
    /// without an API key (stdio) skip the key tier.
    pub fn check(&self, api_key: Option<&str>, connection_id: &str) -> Result<(), McpError> {
        if let Some(key) = api_key {
            self.api_keys.check(key)?;
        }
        self.connections.check(connection_id)?;
        self.global.check()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dshield_mcp_protocol::McpErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_61st_request_in_burst_is_rejected_with_wait() {
        let limiter = ApiKeyRateLimiter::new();
        limiter.create_key("k", 60);
        for _ in 0..60 {
            limiter.check("k").expect("inside burst");
        }
        let err = limiter.check("k").expect_err("61st must be rejected");
        assert_eq!(err.kind, McpErrorKind::RateLimited);
        let retry_after = err.data.expect("data")["retry_after_ms"]
            .as_u64()
            .expect("retry_after_ms");
        assert!(retry_after > 0);
    }

    #[test]
    fn test_unknown_keys_get_conservative_default() {
        let limiter = ApiKeyRateLimiter::new();
        for _ in 0..UNKNOWN_KEY_RPM {
            limiter.check("stranger").expect("inside default burst");
        }
        assert!(limiter.check("stranger").is_err());
        let stats = limiter.key_stats("stranger").expect("stats");
        assert_eq!(stats.requests_per_minute, UNKNOWN_KEY_RPM);
    }

    #[test]
    fn test_blocked_key_overrides_allowance() {
        let limiter = ApiKeyRateLimiter::new();
        limiter.create_key("k", 1000);
        limiter.block_key("k", "abuse");
        assert!(limiter.check("k").is_err());
        limiter.unblock_key("k");
        assert!(limiter.check("k").is_ok());
    }

    #[test]
    fn test_key_stats_shape() {
        let limiter = ApiKeyRateLimiter::new();
        limiter.create_key("k", 60);
        limiter.check("k").expect("allowed");
        let stats = limiter.key_stats("k").expect("stats");
        assert_eq!(stats.requests_per_minute, 60);
        assert_eq!(stats.burst_size, 60);
        assert!(stats.current_tokens < 60.0);
        assert!(!stats.is_blocked);
        assert!(limiter.key_stats("never-seen").is_none());
    }

    #[test]
    fn test_stack_short_circuits_in_order() {
        let stack = RateLimitStack::with_limits(60, 2, 1000);
        stack.check(None, "conn-1").expect("first");
        stack.check(None, "conn-1").expect("second");
        let err = stack.check(None, "conn-1").expect_err("connection tier rejects");
        assert_eq!(err.kind, McpErrorKind::RateLimited);
        // A different connection is still allowed: the rejection came from
        // tier 2, not the global tier.
        stack.check(None, "conn-2").expect("other connection fine");
    }

    #[test]
    fn test_global_ceiling_applies_across_connections() {
        let stack = RateLimitStack::with_limits(60, 100, 3);
        stack.check(None, "a").expect("1");
        stack.check(None, "b").expect("2");
        stack.check(None, "c").expect("3");
        assert!(stack.check(None, "d").is_err(), "global tier exhausted");
    }
}
