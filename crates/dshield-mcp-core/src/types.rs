//! Core domain types shared across the server.
//!
//! Events are maps from dotted field names to JSON values with a required
//! `@timestamp`. Session keys are ordered tuples of field values; the
//! remaining types carry feature availability and per-query cost metrics
//! on the wire.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator joining session-key components. Unit Separator (U+001F) cannot
/// appear in sanitized field values, so joined keys are unambiguous.
pub const SESSION_KEY_SEPARATOR: char = '\u{1f}';

/// Session fields used when the caller does not name any.
pub const DEFAULT_SESSION_FIELDS: [&str; 4] =
    ["source.ip", "destination.ip", "user.name", "session.id"];

/// The timestamp field required on every event.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// A single security event: a document id, an epoch-millisecond timestamp,
/// and the remaining source fields keyed by dotted name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Backing document id, the pagination tiebreaker.
    pub doc_id: String,
    /// Event time in UTC epoch milliseconds.
    pub timestamp_ms: i64,
    /// All source fields, including the original `@timestamp`.
    pub fields: Map<String, Value>,
}

impl Event {
    /// Build an event from a document id and its source map.
    ///
    /// Returns `None` when `@timestamp` is absent or unparseable; such
    /// documents cannot participate in time-ordered pagination.
    pub fn from_source(doc_id: impl Into<String>, fields: Map<String, Value>) -> Option<Self> {
        let timestamp_ms = fields.get(TIMESTAMP_FIELD).and_then(parse_timestamp)?;
        Some(Self {
            doc_id: doc_id.into(),
            timestamp_ms,
            fields,
        })
    }

    /// Look up a field by dotted name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A field rendered as a plain string, for key construction and summary
    /// metadata. Arrays and objects have no scalar rendering and yield `None`.
    pub fn field_as_string(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// The event time as an RFC3339 UTC string.
    pub fn timestamp_rfc3339(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Parse a timestamp value: RFC3339 string or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp_millis()),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// An ordered tuple of session-field values identifying a session, stored
/// pre-joined with [`SESSION_KEY_SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Compute the key for an event over the given ordered field list.
    /// Missing fields contribute the empty string.
    pub fn from_event(event: &Event, session_fields: &[String]) -> Self {
        let parts: Vec<String> = session_fields
            .iter()
            .map(|f| event.field_as_string(f).unwrap_or_default())
            .collect();
        Self(parts.join(&SESSION_KEY_SEPARATOR.to_string()))
    }

    /// True when every component is empty. Such keys are valid but mark the
    /// session as synthetic.
    pub fn is_all_empty(&self) -> bool {
        self.0.chars().all(|c| c == SESSION_KEY_SEPARATOR)
    }

    /// The joined key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named external capability whose availability gates tool exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureTag {
    /// The Elasticsearch cluster holding DShield-indexed events.
    Elasticsearch,
    /// The DShield threat-intelligence HTTP API.
    Dshield,
    /// A local LaTeX toolchain for report rendering.
    Latex,
    /// Derived threat-intel capability (follows DShield).
    ThreatIntel,
}

impl FeatureTag {
    /// All feature tags, in probe order.
    pub const ALL: [FeatureTag; 4] = [
        FeatureTag::Elasticsearch,
        FeatureTag::Dshield,
        FeatureTag::Latex,
        FeatureTag::ThreatIntel,
    ];

    /// The wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "elasticsearch",
            Self::Dshield => "dshield",
            Self::Latex => "latex",
            Self::ThreatIntel => "threat_intel",
        }
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed availability of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeatureState {
    /// The dependency answered its probe.
    Available,
    /// The dependency is unreachable or misconfigured.
    Unavailable {
        /// Human-readable reason recorded at probe time.
        reason: String,
    },
}

impl FeatureState {
    /// Whether the feature is usable right now.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// Shorthand for an unavailable state.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Convenience alias for a set of required features.
pub type FeatureSet = BTreeSet<FeatureTag>;

/// Query-cost classification attached to every paginated or streamed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    /// Plain filtered search.
    Simple,
    /// Search with optimizations applied (projection, page clamping).
    Optimized,
    /// Aggregation query.
    Aggregation,
    /// Served from the fingerprint-keyed result cache.
    Cached,
    /// No matching documents.
    Empty,
}

/// Per-query performance observability payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Wall-clock query time in milliseconds.
    pub query_time_ms: u64,
    /// Number of indices the query touched.
    pub indices_scanned: usize,
    /// Documents examined by the backend.
    pub total_documents_examined: u64,
    /// Cost classification.
    pub query_complexity: QueryComplexity,
    /// Names of optimizations applied to this query.
    pub optimization_applied: Vec<String>,
    /// Whether the result came from the cache.
    pub cache_hit: bool,
    /// Shards scanned by the backend.
    pub shards_scanned: usize,
    /// Whether aggregations ran.
    pub aggregations_used: bool,
}

impl PerformanceMetrics {
    /// Metrics for a plain search.
    pub fn simple(query_time_ms: u64, indices_scanned: usize, documents_examined: u64) -> Self {
        Self {
            query_time_ms,
            indices_scanned,
            total_documents_examined: documents_examined,
            query_complexity: QueryComplexity::Simple,
            optimization_applied: Vec::new(),
            cache_hit: false,
            shards_scanned: 0,
            aggregations_used: false,
        }
    }

    /// Metrics for a cache hit. Scan counters are zero by definition.
    pub fn cached(query_time_ms: u64) -> Self {
        Self {
            query_time_ms,
            indices_scanned: 0,
            total_documents_examined: 0,
            query_complexity: QueryComplexity::Cached,
            optimization_applied: Vec::new(),
            cache_hit: true,
            shards_scanned: 0,
            aggregations_used: false,
        }
    }

    /// Metrics for a query that matched nothing.
    pub fn empty(query_time_ms: u64, indices_scanned: usize) -> Self {
        Self {
            query_time_ms,
            indices_scanned,
            total_documents_examined: 0,
            query_complexity: QueryComplexity::Empty,
            optimization_applied: Vec::new(),
            cache_hit: false,
            shards_scanned: 0,
            aggregations_used: false,
        }
    }

    /// Record an applied optimization and upgrade the complexity class.
    pub fn record_optimization(&mut self, name: impl Into<String>) {
        self.optimization_applied.push(name.into());
        if self.query_complexity == QueryComplexity::Simple {
            self.query_complexity = QueryComplexity::Optimized;
        }
    }
}
