//! Rate-limiting primitives.
//!
//! Two building blocks compose into the server's hierarchical limiter: a
//! lazily-refilled token bucket (per API key) and a sliding window counter
//! (per connection and global). State sits behind `parking_lot` mutexes and
//! is never held across an await point.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token bucket: capacity `burst_size`, refilling at
/// `requests_per_minute / 60` tokens per second. Refills are computed
/// lazily on access.
#[derive(Debug)]
pub struct TokenBucket {
    requests_per_minute: u32,
    burst_size: u32,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket with `burst_size == requests_per_minute`.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_burst(requests_per_minute, requests_per_minute)
    }

    /// Bucket with an explicit burst capacity.
    pub fn with_burst(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            burst_size: burst_size.max(1),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst_size.max(1)),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consume one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one token becomes available. Zero when a token is ready.
    pub fn wait_time(&self) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let needed = 1.0 - state.tokens;
        Duration::from_secs_f64(needed * 60.0 / f64::from(self.requests_per_minute))
    }

    /// Current token count after a lazy refill.
    pub fn current_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Configured sustained rate.
    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Configured burst capacity.
    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let refreshed = elapsed * f64::from(self.requests_per_minute) / 60.0;
        state.tokens = (state.tokens + refreshed).min(f64::from(self.burst_size));
        state.last_refill = now;
    }
}

/// Sliding window counter: timestamps of recent requests, pruned beyond the
/// window on every access.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    /// Window of `limit` requests over 60 seconds.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Window of `limit` requests over an arbitrary duration.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a request if the window has room.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        Self::prune(&mut hits, now, self.window);
        if hits.len() < self.limit as usize {
            hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest in-window request expires. Zero when there is
    /// room now.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        Self::prune(&mut hits, now, self.window);
        if hits.len() < self.limit as usize {
            return Duration::ZERO;
        }
        match hits.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Requests currently inside the window.
    pub fn current_count(&self) -> usize {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        Self::prune(&mut hits, now, self.window);
        hits.len()
    }

    fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = hits.front() {
            if now.duration_since(*front) >= window {
                hits.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_denies_past_burst() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire(), "61st immediate request must be denied");
        assert!(bucket.wait_time() > Duration::ZERO);
    }

    #[test]
    fn test_bucket_wait_time_matches_refill_rate() {
        let bucket = TokenBucket::new(60); // one token per second
        for _ in 0..60 {
            bucket.try_acquire();
        }
        let wait = bucket.wait_time();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let bucket = TokenBucket::with_burst(6000, 1); // 100 tokens/sec
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_acquire(), "bucket should refill within 30ms");
    }

    #[test]
    fn test_bucket_tokens_capped_at_burst() {
        let bucket = TokenBucket::with_burst(6000, 5);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.current_tokens() <= 5.0);
    }

    #[test]
    fn test_window_allows_up_to_limit() {
        let window = SlidingWindow::per_minute(10);
        for _ in 0..10 {
            assert!(window.try_acquire());
        }
        assert!(!window.try_acquire());
        assert_eq!(window.current_count(), 10);
        assert!(window.wait_time() > Duration::ZERO);
    }

    #[test]
    fn test_window_prunes_expired_entries() {
        let window = SlidingWindow::new(2, Duration::from_millis(40));
        assert!(window.try_acquire());
        assert!(window.try_acquire());
        assert!(!window.try_acquire());
        std::thread::sleep(Duration::from_millis(50));
        assert!(window.try_acquire(), "entries should expire with the window");
    }
}
