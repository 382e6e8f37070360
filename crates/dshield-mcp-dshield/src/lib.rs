//! # DShield Threat-Intelligence Client
//!
//! IP reputation lookups against the DShield HTTP API with per-IP TTL
//! memoization, coalesced concurrent lookups, a host-scoped rate limit, and
//! a circuit breaker that degrades to well-formed "no data" records instead
//! of failing.

pub mod client;

pub use client::{DshieldClient, DshieldConfig, DshieldError, IpEnrichment};
