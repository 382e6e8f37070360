//! # DShield MCP Core
//!
//! Shared domain types and algorithms for the DShield MCP server:
//!
//! - Security event and session modeling ([`types`])
//! - The restartable event-stream abstraction ([`stream`])
//! - Gap-bounded session chunking ([`session`])
//! - Rate-limiting primitives ([`limit`])
//! - Circuit breaking and retry policies ([`breaker`], [`retry`])
//!
//! This crate holds no I/O of its own; the Elasticsearch and DShield client
//! crates plug their transports into these abstractions.

pub mod breaker;
pub mod limit;
pub mod retry;
pub mod session;
pub mod stream;
pub mod types;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use limit::{SlidingWindow, TokenBucket};
pub use retry::BackoffPolicy;
pub use session::{ChunkError, ChunkOutcome, SessionChunker, SessionChunkerConfig, SessionSummary};
pub use stream::{EventStream, StreamError, VecEventStream};
pub use types::{
    DEFAULT_SESSION_FIELDS, Event, FeatureSet, FeatureState, FeatureTag, PerformanceMetrics,
    QueryComplexity, SessionKey, TIMESTAMP_FIELD, parse_timestamp,
};
