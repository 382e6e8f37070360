//! Tool handler implementations, one module per category.

pub mod analysis;
pub mod enrichment;
pub mod monitoring;
pub mod query;
pub mod reporting;

use std::sync::Arc;

use serde_json::{Map, Value};

use dshield_mcp_core::Event;
use dshield_mcp_protocol::McpError;

use crate::dispatch::Dispatcher;

/// Register every built-in tool handler.
pub fn register_builtin(dispatcher: &mut Dispatcher) {
    dispatcher.register("query_dshield_events", Arc::new(query::QueryEventsHandler));
    dispatcher.register(
        "stream_dshield_events_with_session_context",
        Arc::new(query::StreamEventsHandler),
    );
    dispatcher.register("get_data_dictionary", Arc::new(analysis::DataDictionaryHandler));
    dispatcher.register("analyze_campaign", Arc::new(analysis::AnalyzeCampaignHandler));
    dispatcher.register(
        "expand_campaign_indicators",
        Arc::new(analysis::ExpandCampaignIndicatorsHandler),
    );
    dispatcher.register(
        "get_campaign_timeline",
        Arc::new(analysis::CampaignTimelineHandler),
    );
    dispatcher.register("enrich_ip_with_dshield", Arc::new(enrichment::EnrichIpHandler));
    dispatcher.register(
        "generate_attack_report",
        Arc::new(reporting::AttackReportHandler),
    );
    dispatcher.register("get_health_status", Arc::new(monitoring::HealthStatusHandler));
}

/// Wire form of one event: its source fields plus the document id.
pub(crate) fn event_to_json(event: &Event) -> Value {
    let mut object = event.fields.clone();
    object.insert("_id".to_string(), Value::String(event.doc_id.clone()));
    Value::Object(object)
}

pub(crate) fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub(crate) fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub(crate) fn opt_string_array(args: &Value, key: &str) -> Option<Vec<String>> {
    let items = args.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// A required string array, with a pointer-carrying error when absent.
pub(crate) fn required_string_array(args: &Value, key: &str) -> Result<Vec<String>, McpError> {
    opt_string_array(args, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            McpError::invalid_params(format!("'{key}' is required"), format!("/{key}"))
        })
}

/// A required string, with a pointer-carrying error when absent.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, McpError> {
    opt_str(args, key).ok_or_else(|| {
        McpError::invalid_params(format!("'{key}' is required"), format!("/{key}"))
    })
}

/// The caller's filters object, defaulting to empty.
pub(crate) fn filters_of(args: &Value) -> Value {
    args.get("filters").cloned().unwrap_or(Value::Object(Map::new()))
}
