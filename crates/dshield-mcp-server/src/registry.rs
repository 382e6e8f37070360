//! The static tool registry.
//!
//! Descriptors are immutable after registration; two descriptors with the
//! same name are a configuration error surfaced at startup. `tools/list`
//! output is sorted by name and filtered by feature availability.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};

use dshield_mcp_core::{FeatureSet, FeatureTag};

use crate::features::FeatureManager;

/// Global ceiling on any per-call timeout.
pub const GLOBAL_TIMEOUT_CEILING: Duration = Duration::from_secs(300);

/// Tool grouping, used for category-level dispatch fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolCategory {
    /// Event queries and streams.
    Query,
    /// Campaign and dictionary analysis.
    Analysis,
    /// IP enrichment.
    Enrichment,
    /// Server health.
    Monitoring,
    /// Report generation.
    Reporting,
}

impl ToolCategory {
    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Analysis => "analysis",
            Self::Enrichment => "enrichment",
            Self::Monitoring => "monitoring",
            Self::Reporting => "reporting",
        }
    }
}

/// One registered tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// One-line description shown to clients.
    pub description: String,
    /// Category for dispatch fallbacks.
    pub category: ToolCategory,
    /// JSON Schema for the tool's arguments.
    pub parameter_schema: Value,
    /// Features that must be available to expose and call this tool.
    pub required_features: FeatureSet,
    /// Per-tool execution timeout.
    pub timeout: Duration,
}

/// Registry errors; all configuration mistakes caught at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two descriptors under one name.
    #[error("duplicate tool registration: {0}")]
    Duplicate(String),
}

/// The immutable-after-startup tool table.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in DShield analysis tools.
    pub fn with_builtin_tools() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in builtin_tools() {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register one descriptor. Duplicate names are a configuration error.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Look up one descriptor.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// All descriptors, name-sorted.
    pub fn all(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    /// Descriptors whose requirements are currently satisfied, name-sorted.
    pub fn available(&self, features: &FeatureManager) -> Vec<&ToolDescriptor> {
        self.tools
            .values()
            .filter(|d| features.require_all(&d.required_features).is_ok())
            .collect()
    }

    /// The `tools/list` result payload.
    pub fn list_payload(&self, features: &FeatureManager) -> Value {
        let tools: Vec<Value> = self
            .available(features)
            .into_iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "inputSchema": d.parameter_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }
}

fn features(tags: &[FeatureTag]) -> FeatureSet {
    tags.iter().copied().collect()
}

const CAMPAIGN_ID_PATTERN: &str = "^[A-Za-z0-9_-]{1,100}$";
const PATH_PATTERN: &str = "^[A-Za-z0-9_/.-]{1,500}$";

/// The built-in tool set.
fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "query_dshield_events".to_string(),
            description: "Query DShield events with filters, projection, and pagination"
                .to_string(),
            category: ToolCategory::Query,
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start_time": { "type": "string", "format": "date-time" },
                    "end_time": { "type": "string", "format": "date-time" },
                    "filters": { "type": "object" },
                    "fields": {
                        "type": "array",
                        "items": { "type": "string", "minLength": 1, "maxLength": 256 }
                    },
                    "page_size": { "type": "integer", "minimum": 1, "maximum": 1000 },
                    "page_number": { "type": "integer", "minimum": 1 },
                    "cursor": { "type": "string", "minLength": 1 }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Elasticsearch]),
            timeout: Duration::from_secs(60),
        },
        ToolDescriptor {
            name: "stream_dshield_events_with_session_context".to_string(),
            description: "Stream DShield events in session-aligned chunks for campaign analysis"
                .to_string(),
            category: ToolCategory::Query,
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "chunk_size": { "type": "integer", "minimum": 1, "maximum": 1000 },
                    "session_fields": {
                        "type": "array",
                        "items": { "type": "string", "minLength": 1, "maxLength": 256 }
                    },
                    "max_session_gap_minutes": { "type": "integer", "minimum": 1 },
                    "filters": { "type": "object" },
                    "stream_id": { "type": "string", "minLength": 1 }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Elasticsearch]),
            timeout: Duration::from_secs(300),
        },
        ToolDescriptor {
            name: "get_data_dictionary".to_string(),
            description: "Describe the DShield event fields and their meanings".to_string(),
            category: ToolCategory::Analysis,
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string", "minLength": 1, "maxLength": 100 }
                },
                "additionalProperties": false
            }),
            required_features: FeatureSet::new(),
            timeout: Duration::from_secs(30),
        },
        ToolDescriptor {
            name: "analyze_campaign".to_string(),
            description: "Correlate seed indicators into a campaign summary".to_string(),
            category: ToolCategory::Analysis,
            parameter_schema: json!({
                "type": "object",
                "required": ["seed_iocs"],
                "properties": {
                    "seed_iocs": {
                        "type": "array",
                        "items": { "type": "string", "minLength": 1, "maxLength": 1000 },
                        "minItems": 1,
                        "maxItems": 100
                    },
                    "time_range": {
                        "type": "object",
                        "properties": {
                            "start_time": { "type": "string", "format": "date-time" },
                            "end_time": { "type": "string", "format": "date-time" }
                        },
                        "additionalProperties": false
                    },
                    "correlation_window": { "type": "integer", "minimum": 1, "maximum": 1440 }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Elasticsearch, FeatureTag::Dshield]),
            timeout: Duration::from_secs(120),
        },
        ToolDescriptor {
            name: "expand_campaign_indicators".to_string(),
            description: "Pivot on a campaign's indicators to discover related ones".to_string(),
            category: ToolCategory::Analysis,
            parameter_schema: json!({
                "type": "object",
                "required": ["campaign_id"],
                "properties": {
                    "campaign_id": {
                        "type": "string",
                        "pattern": CAMPAIGN_ID_PATTERN
                    },
                    "expansion_depth": { "type": "integer", "minimum": 1, "maximum": 5 }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Elasticsearch]),
            timeout: Duration::from_secs(120),
        },
        ToolDescriptor {
            name: "get_campaign_timeline".to_string(),
            description: "Bucket a campaign's events over time".to_string(),
            category: ToolCategory::Analysis,
            parameter_schema: json!({
                "type": "object",
                "required": ["campaign_id"],
                "properties": {
                    "campaign_id": {
                        "type": "string",
                        "pattern": CAMPAIGN_ID_PATTERN
                    },
                    "granularity": {
                        "type": "string",
                        "enum": ["hourly", "daily", "weekly"]
                    }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Elasticsearch]),
            timeout: Duration::from_secs(60),
        },
        ToolDescriptor {
            name: "enrich_ip_with_dshield".to_string(),
            description: "Enrich one IP or a batch with DShield reputation data".to_string(),
            category: ToolCategory::Enrichment,
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "ip_address": { "type": "string", "minLength": 7, "maxLength": 45 },
                    "ip_addresses": {
                        "type": "array",
                        "items": { "type": "string", "minLength": 7, "maxLength": 45 },
                        "minItems": 1,
                        "maxItems": 100
                    }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Dshield]),
            timeout: Duration::from_secs(30),
        },
        ToolDescriptor {
            name: "generate_attack_report".to_string(),
            description: "Render a campaign attack report".to_string(),
            category: ToolCategory::Reporting,
            parameter_schema: json!({
                "type": "object",
                "required": ["campaign_id"],
                "properties": {
                    "campaign_id": {
                        "type": "string",
                        "pattern": CAMPAIGN_ID_PATTERN
                    },
                    "template_name": {
                        "type": "string",
                        "pattern": CAMPAIGN_ID_PATTERN
                    },
                    "output_path": {
                        "type": "string",
                        "pattern": PATH_PATTERN
                    }
                },
                "additionalProperties": false
            }),
            required_features: features(&[FeatureTag::Latex]),
            timeout: Duration::from_secs(120),
        },
        ToolDescriptor {
            name: "get_health_status".to_string(),
            description: "Report feature availability, breaker states, and error counters"
                .to_string(),
            category: ToolCategory::Monitoring,
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "detailed": { "type": "boolean" }
                },
                "additionalProperties": false
            }),
            required_features: FeatureSet::new(),
            timeout: Duration::from_secs(30),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    use dshield_mcp_core::{CircuitBreaker, FeatureState};

    fn feature_manager() -> FeatureManager {
        FeatureManager::new(
            Arc::new(CircuitBreaker::new("es-test")),
            Arc::new(CircuitBreaker::new("dshield-test")),
        )
    }

    #[test]
    fn test_builtin_registry_loads() {
        let registry = ToolRegistry::with_builtin_tools().expect("no duplicates");
        assert_eq!(registry.all().count(), 9);
        assert!(registry.get("query_dshield_events").is_some());
        assert!(registry.get("get_health_status").is_some());
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut registry = ToolRegistry::with_builtin_tools().expect("loads");
        let clone = registry.get("get_health_status").expect("exists").clone();
        assert!(matches!(registry.register(clone), Err(RegistryError::Duplicate(_))));
    }

    #[test]
    fn test_listing_is_name_sorted() {
        let registry = ToolRegistry::with_builtin_tools().expect("loads");
        let names: Vec<&str> = registry.all().map(|d| d.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_feature_gating_filters_listing() {
        let registry = ToolRegistry::with_builtin_tools().expect("loads");
        let features = feature_manager();

        // Nothing probed: only feature-free tools appear.
        let names: Vec<&str> = registry
            .available(&features)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["get_data_dictionary", "get_health_status"]);

        features.set(FeatureTag::Elasticsearch, FeatureState::Available);
        let names: Vec<&str> = registry
            .available(&features)
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert!(names.contains(&"query_dshield_events"));
        assert!(
            !names.contains(&"analyze_campaign"),
            "still needs dshield"
        );
    }

    #[test]
    fn test_list_payload_shape() {
        let registry = ToolRegistry::with_builtin_tools().expect("loads");
        let features = feature_manager();
        let payload = registry.list_payload(&features);
        let tools = payload["tools"].as_array().expect("tools array");
        assert!(!tools.is_empty());
        for tool in tools {
            assert!(tool["name"].is_string());
            assert!(tool["description"].is_string());
            assert!(tool["inputSchema"].is_object());
        }
    }

    #[test]
    fn test_timeouts_within_global_ceiling() {
        let registry = ToolRegistry::with_builtin_tools().expect("loads");
        for descriptor in registry.all() {
            assert!(descriptor.timeout <= GLOBAL_TIMEOUT_CEILING);
        }
    }
}
