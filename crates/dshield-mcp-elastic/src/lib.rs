//! # DShield MCP Elasticsearch Client
//!
//! Read-only client for the DShield event indices: connection lifecycle,
//! index discovery, filtered queries with page-number and cursor pagination,
//! aggregation passthrough, and session-aware chunk streaming. Every result
//! carries performance metrics; resilience comes from jittered retries and a
//! circuit breaker shared with the feature manager.

pub mod cache;
pub mod client;
pub mod cursor;
pub mod error;
pub mod pagination;
pub mod query;
pub mod stream;

pub use client::{AggregationResult, ElasticsearchClient, ElasticsearchConfig, QueryPage};
pub use cursor::Cursor;
pub use error::EsError;
pub use pagination::{DEEP_PAGE_LIMIT, PageInfo, PageSelector};
pub use query::{FilterValue, QuerySpec, SortOrder, TimeRange};
pub use stream::{EsEventStream, SessionContext, StreamChunk, StreamRequest};
