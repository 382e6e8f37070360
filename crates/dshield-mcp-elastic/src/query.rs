//! Query model: time range, filters, projection, sort, and the query
//! fingerprint guarding cursor replay.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::EsError;

/// Time scope of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeRange {
    /// The trailing N hours from now.
    LastHours(u32),
    /// An explicit UTC interval.
    Absolute {
        /// Inclusive start.
        start: DateTime<Utc>,
        /// Inclusive end.
        end: DateTime<Utc>,
    },
}

impl TimeRange {
    fn to_range_clause(&self) -> Value {
        match self {
            Self::LastHours(hours) => json!({
                "range": {
                    "@timestamp": { "gte": format!("now-{hours}h"), "lte": "now" }
                }
            }),
            Self::Absolute { start, end } => json!({
                "range": {
                    "@timestamp": {
                        "gte": start.to_rfc3339_opts(SecondsFormat::Millis, true),
                        "lte": end.to_rfc3339_opts(SecondsFormat::Millis, true),
                    }
                }
            }),
        }
    }
}

/// One filter predicate. Composed as a conjunction in the bool `must`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    /// Exact term match.
    Term(Value),
    /// Any-of match.
    Terms(Vec<Value>),
    /// Range predicate with the standard comparison operators.
    Range(BTreeMap<String, Value>),
}

const RANGE_OPERATORS: [&str; 4] = ["gt", "gte", "lt", "lte"];

impl FilterValue {
    /// Interpret a caller-supplied filter value. Scalars become terms,
    /// arrays become any-of, objects must hold only range operators.
    pub fn from_json(field: &str, value: &Value) -> Result<Self, EsError> {
        match value {
            Value::Array(items) => Ok(Self::Terms(items.clone())),
            Value::Object(map) => {
                let mut ops = BTreeMap::new();
                for (op, v) in map {
                    if !RANGE_OPERATORS.contains(&op.as_str()) {
                        return Err(EsError::UnsupportedFilter {
                            field: field.to_string(),
                            reason: format!("unknown operator '{op}'"),
                        });
                    }
                    ops.insert(op.clone(), v.clone());
                }
                if ops.is_empty() {
                    return Err(EsError::UnsupportedFilter {
                        field: field.to_string(),
                        reason: "empty range object".to_string(),
                    });
                }
                Ok(Self::Range(ops))
            }
            Value::Null => Err(EsError::UnsupportedFilter {
                field: field.to_string(),
                reason: "null filter value".to_string(),
            }),
            scalar => Ok(Self::Term(scalar.clone())),
        }
    }

    fn to_clause(&self, field: &str) -> Value {
        match self {
            Self::Term(v) => json!({ "term": { (field): v } }),
            Self::Terms(vs) => json!({ "terms": { (field): vs } }),
            Self::Range(ops) => json!({ "range": { (field): ops } }),
        }
    }
}

/// Sort direction; descending is the only order the event APIs use, but the
/// model keeps both for aggregation passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// A fully resolved query: everything that defines result identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Time scope.
    pub time_range: TimeRange,
    /// Conjunction of field filters, keyed by field name. `BTreeMap` keeps
    /// the fingerprint independent of caller ordering.
    pub filters: BTreeMap<String, FilterValue>,
    /// Source-field projection; `None` returns full documents.
    pub fields: Option<Vec<String>>,
    /// Requested page size.
    pub page_size: usize,
    /// Sort field, `@timestamp` for the event APIs.
    pub sort_field: String,
    /// Sort direction.
    pub sort_order: SortOrder,
}

impl QuerySpec {
    /// Spec over the trailing `hours` with default sort.
    pub fn last_hours(hours: u32, page_size: usize) -> Self {
        Self {
            time_range: TimeRange::LastHours(hours),
            filters: BTreeMap::new(),
            fields: None,
            page_size,
            sort_field: "@timestamp".to_string(),
            sort_order: SortOrder::Desc,
        }
    }

    /// Parse a caller-supplied filters object into the model.
    pub fn with_filters(mut self, filters: &Value) -> Result<Self, EsError> {
        if let Some(map) = filters.as_object() {
            for (field, value) in map {
                self.filters
                    .insert(field.clone(), FilterValue::from_json(field, value)?);
            }
        }
        Ok(self)
    }

    /// Restrict returned source fields.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = (!fields.is_empty()).then_some(fields);
        self
    }

    /// The `_search` request body, without pagination parameters.
    pub fn to_search_body(&self) -> Value {
        let mut must = vec![self.time_range.to_range_clause()];
        for (field, filter) in &self.filters {
            must.push(filter.to_clause(field));
        }

        let mut body = json!({
            "query": { "bool": { "must": must } },
            "sort": [
                { (self.sort_field.as_str()): { "order": self.sort_order.as_str() } },
                { "_id": { "order": self.sort_order.as_str() } }
            ],
            "track_total_hits": true,
        });
        if let Some(fields) = &self.fields {
            body["_source"] = json!(fields);
        }
        body
    }

    /// Deterministic fingerprint over everything that defines result
    /// identity: index set, filters, sort, projection, and page size.
    /// Guards cursor replay and keys the result cache.
    pub fn fingerprint(&self, indices: &[String]) -> String {
        let mut sorted_indices: Vec<&String> = indices.iter().collect();
        sorted_indices.sort();

        let canonical = json!({
            "indices": sorted_indices,
            "time_range": self.time_range,
            "filters": self.filters,
            "fields": self.fields,
            "sort": [self.sort_field.clone(), self.sort_order.as_str()],
            "page_size": self.page_size,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        // 16 bytes of the digest is plenty for replay protection.
        hex_lower(&digest[..16])
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
