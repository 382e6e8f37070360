//! Analysis-category tools: the data dictionary and the campaign workflow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use dshield_mcp_elastic::{QuerySpec, TimeRange};
use dshield_mcp_protocol::sanitize::{SanitizeOptions, sanitize_with};
use dshield_mcp_protocol::McpError;

use crate::campaign::{CampaignRecord, campaign_id_for};
use crate::context::ServerContext;
use crate::dispatch::ToolHandler;
use crate::error::{map_dshield_error, map_es_error};
use crate::handlers::{opt_str, opt_u64, required_str, required_string_array};

/// `get_data_dictionary`: the DShield event field reference.
#[derive(Debug)]
pub struct DataDictionaryHandler;

/// Field name, category, type, description, example.
const DICTIONARY: &[(&str, &str, &str, &str, &str)] = &[
    ("@timestamp", "core", "date", "Event time in UTC", "2024-01-01T10:00:00Z"),
    ("event.category", "core", "keyword", "High-level event classification", "network"),
    ("event.kind", "core", "keyword", "Kind of event record", "alert"),
    ("source.ip", "network", "ip", "Address the activity originated from", "192.0.2.10"),
    ("source.port", "network", "integer", "Originating port", "51515"),
    ("destination.ip", "network", "ip", "Address the activity targeted", "198.51.100.7"),
    ("destination.port", "network", "integer", "Targeted port", "22"),
    ("network.transport", "network", "keyword", "Transport protocol", "tcp"),
    ("user.name", "auth", "keyword", "User name observed in the event", "root"),
    ("session.id", "auth", "keyword", "Honeypot session identifier", "s-8f2a"),
    ("url.original", "http", "keyword", "Requested URL as observed", "/wp-login.php"),
    ("http.request.method", "http", "keyword", "HTTP method", "POST"),
    ("user_agent.original", "http", "keyword", "Client user agent string", "curl/8.5.0"),
    ("file.name", "malware", "keyword", "File dropped or referenced", "payload.sh"),
    ("file.hash.sha256", "malware", "keyword", "SHA-256 of the referenced file", "e3b0c442…"),
    ("threat.indicator.type", "intel", "keyword", "Indicator type from enrichment", "ipv4-addr"),
    ("dshield.attack_count", "intel", "long", "DShield attack report count", "87"),
    ("dshield.reputation_score", "intel", "float", "Normalized reputation score", "43.5"),
];

#[async_trait]
impl ToolHandler for DataDictionaryHandler {
    async fn call(&self, arguments: Value, _ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let category = opt_str(&arguments, "category");
        let fields: Vec<Value> = DICTIONARY
            .iter()
            .filter(|(_, cat, ..)| category.is_none_or(|c| c.eq_ignore_ascii_case(cat)))
            .map(|(name, cat, ty, description, example)| {
                json!({
                    "field": name,
                    "category": cat,
                    "type": ty,
                    "description": description,
                    "example": example,
                })
            })
            .collect();

        if fields.is_empty() {
            return Err(McpError::invalid_params(
                "unknown dictionary category",
                "/category",
            ));
        }
        Ok(json!({ "fields": fields, "field_count": fields.len() }))
    }
}

/// Time scope for a campaign, from explicit range or the configured default.
fn campaign_time_range(args: &Value, ctx: &ServerContext) -> Result<TimeRange, McpError> {
    if let Some(range) = args.get("time_range") {
        let parse = |key: &str| -> Result<DateTime<Utc>, McpError> {
            let raw = range.get(key).and_then(Value::as_str).ok_or_else(|| {
                McpError::invalid_params(
                    format!("time_range.{key} is required when time_range is given"),
                    format!("/time_range/{key}"),
                )
            })?;
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.to_utc())
                .map_err(|e| {
                    McpError::invalid_params(
                        format!("bad time_range.{key}: {e}"),
                        format!("/time_range/{key}"),
                    )
                })
        };
        return Ok(TimeRange::Absolute {
            start: parse("start_time")?,
            end: parse("end_time")?,
        });
    }
    Ok(TimeRange::LastHours(ctx.config.default_time_range_hours))
}

/// Indicators that look like plain addresses; the rest stay free-text.
fn ip_indicators(iocs: &[String]) -> Vec<String> {
    iocs.iter()
        .filter(|ioc| ioc.parse::<std::net::IpAddr>().is_ok())
        .cloned()
        .collect()
}

/// The bool-query spec scoping one campaign's events.
fn campaign_spec(record: &CampaignRecord, ctx: &ServerContext) -> Result<QuerySpec, McpError> {
    let ips = ip_indicators(&record.seed_iocs);
    let mut filters = serde_json::Map::new();
    if !ips.is_empty() {
        filters.insert("source.ip".to_string(), json!(ips));
    }
    let mut spec = QuerySpec::last_hours(
        ctx.config.default_time_range_hours,
        ctx.config.max_query_results,
    )
    .with_filters(&Value::Object(filters))
    .map_err(map_es_error)?;
    if let Some((start, end)) = record.time_range {
        spec.time_range = TimeRange::Absolute { start, end };
    }
    Ok(spec)
}

/// `analyze_campaign`: correlate seed indicators into a campaign record.
#[derive(Debug)]
pub struct AnalyzeCampaignHandler;

#[async_trait]
impl ToolHandler for AnalyzeCampaignHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        // Indicators are matched verbatim against event fields, so pattern
        // stripping stays off; length and control rules still apply.
        let seed_iocs: Vec<String> = required_string_array(&arguments, "seed_iocs")?
            .iter()
            .map(|ioc| {
                sanitize_with(
                    ioc,
                    SanitizeOptions {
                        max_length: 1000,
                        strip_patterns: false,
                    },
                )
            })
            .filter(|ioc| !ioc.is_empty())
            .collect();
        if seed_iocs.is_empty() {
            return Err(McpError::invalid_params(
                "seed_iocs contained no usable indicators",
                "/seed_iocs",
            ));
        }

        let correlation_window = opt_u64(&arguments, "correlation_window").unwrap_or(1440) as u32;
        let time_range = campaign_time_range(&arguments, &ctx)?;

        let mut record = CampaignRecord {
            campaign_id: campaign_id_for(&seed_iocs),
            seed_iocs: seed_iocs.clone(),
            correlation_window_minutes: correlation_window,
            time_range: match time_range {
                TimeRange::Absolute { start, end } => Some((start, end)),
                TimeRange::LastHours(_) => None,
            },
            event_count: 0,
            first_seen: None,
            last_seen: None,
            top_sources: Vec::new(),
            analyzed_at: Utc::now(),
        };

        let spec = campaign_spec(&record, &ctx)?;
        let aggregation = ctx
            .elastic
            .execute_aggregation_query(
                &spec,
                json!({
                    "sources": { "terms": { "field": "source.ip", "size": 10 } },
                    "span": { "stats": { "field": "@timestamp" } },
                }),
            )
            .await
            .map_err(map_es_error)?;

        record.event_count = aggregation.metrics.total_documents_examined;
        record.top_sources = aggregation.aggregations["sources"]["buckets"]
            .as_array()
            .map(|buckets| {
                buckets
                    .iter()
                    .filter_map(|b| {
                        Some((
                            b.get("key")?.as_str()?.to_string(),
                            b.get("doc_count")?.as_u64()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        record.first_seen = aggregation.aggregations["span"]["min_as_string"]
            .as_str()
            .map(str::to_string);
        record.last_seen = aggregation.aggregations["span"]["max_as_string"]
            .as_str()
            .map(str::to_string);

        // Enrich the first few seed addresses; the campaign survives a
        // degraded intel backend, so enrichment failures only log.
        let enrich_ips: Vec<String> = ip_indicators(&seed_iocs)
            .into_iter()
            .take(ctx.dshield.batch_limit().min(10))
            .collect();
        let enrichments = match ctx.dshield.enrich_batch(&enrich_ips).await {
            Ok(records) => records
                .iter()
                .map(|r| serde_json::to_value(r.as_ref()).unwrap_or(Value::Null))
                .collect(),
            Err(err) => {
                let mapped = map_dshield_error(err);
                tracing::warn!(error = %mapped, "seed enrichment unavailable");
                Vec::new()
            }
        };

        let record = ctx.campaigns.insert(record);
        Ok(json!({
            "campaign_id": record.campaign_id,
            "seed_iocs": record.seed_iocs,
            "correlation_window": record.correlation_window_minutes,
            "event_count": record.event_count,
            "first_seen": record.first_seen,
            "last_seen": record.last_seen,
            "top_sources": record.top_sources,
            "seed_enrichment": enrichments,
            "performance_metrics": aggregation.metrics,
        }))
    }
}

/// Look up a campaign or fail with a pointer at the argument.
fn campaign_of(ctx: &ServerContext, campaign_id: &str) -> Result<Arc<CampaignRecord>, McpError> {
    ctx.campaigns.get(campaign_id).ok_or_else(|| {
        McpError::invalid_params(
            format!("unknown campaign '{campaign_id}'; run analyze_campaign first"),
            "/campaign_id",
        )
    })
}

/// `expand_campaign_indicators`: pivot on a campaign's events for related
/// indicators.
#[derive(Debug)]
pub struct ExpandCampaignIndicatorsHandler;

#[async_trait]
impl ToolHandler for ExpandCampaignIndicatorsHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let campaign_id = required_str(&arguments, "campaign_id")?;
        let record = campaign_of(&ctx, campaign_id)?;
        let depth = opt_u64(&arguments, "expansion_depth").unwrap_or(1).clamp(1, 5) as usize;

        let spec = campaign_spec(&record, &ctx)?;
        let size = 10 * depth;
        let aggregation = ctx
            .elastic
            .execute_aggregation_query(
                &spec,
                json!({
                    "destinations": { "terms": { "field": "destination.ip", "size": size } },
                    "ports": { "terms": { "field": "destination.port", "size": size } },
                    "categories": { "terms": { "field": "event.category", "size": size } },
                }),
            )
            .await
            .map_err(map_es_error)?;

        let bucket_keys = |agg: &str| -> Vec<Value> {
            aggregation.aggregations[agg]["buckets"]
                .as_array()
                .map(|buckets| {
                    buckets
                        .iter()
                        .filter_map(|b| {
                            Some(json!({
                                "value": b.get("key")?.clone(),
                                "event_count": b.get("doc_count")?.clone(),
                            }))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(json!({
            "campaign_id": record.campaign_id,
            "expansion_depth": depth,
            "related_destinations": bucket_keys("destinations"),
            "related_ports": bucket_keys("ports"),
            "related_categories": bucket_keys("categories"),
            "performance_metrics": aggregation.metrics,
        }))
    }
}

/// `get_campaign_timeline`: bucket a campaign's events over time.
#[derive(Debug)]
pub struct CampaignTimelineHandler;

#[async_trait]
impl ToolHandler for CampaignTimelineHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let campaign_id = required_str(&arguments, "campaign_id")?;
        let record = campaign_of(&ctx, campaign_id)?;
        let granularity = opt_str(&arguments, "granularity").unwrap_or("hourly");
        let interval = match granularity {
            "hourly" => "hour",
            "daily" => "day",
            "weekly" => "week",
            other => {
                return Err(McpError::invalid_params(
                    format!("unknown granularity '{other}'"),
                    "/granularity",
                ));
            }
        };

        let spec = campaign_spec(&record, &ctx)?;
        let aggregation = ctx
            .elastic
            .execute_aggregation_query(
                &spec,
                json!({
                    "timeline": {
                        "date_histogram": {
                            "field": "@timestamp",
                            "calendar_interval": interval,
                            "min_doc_count": 0,
                        }
                    }
                }),
            )
            .await
            .map_err(map_es_error)?;

        let buckets: Vec<Value> = aggregation.aggregations["timeline"]["buckets"]
            .as_array()
            .map(|buckets| {
                buckets
                    .iter()
                    .filter_map(|b| {
                        Some(json!({
                            "timestamp": b.get("key_as_string").or(b.get("key"))?.clone(),
                            "event_count": b.get("doc_count")?.clone(),
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "campaign_id": record.campaign_id,
            "granularity": granularity,
            "buckets": buckets,
            "performance_metrics": aggregation.metrics,
        }))
    }
}
