//! Query-category tools: paged event queries and session-aware streaming.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{Value, json};

use dshield_mcp_core::DEFAULT_SESSION_FIELDS;
use dshield_mcp_elastic::{PageSelector, QuerySpec, StreamRequest, TimeRange};
use dshield_mcp_protocol::McpError;

use crate::context::ServerContext;
use crate::dispatch::ToolHandler;
use crate::error::map_es_error;
use crate::handlers::{event_to_json, filters_of, opt_str, opt_string_array, opt_u64};

/// Default page size when the caller names none.
const DEFAULT_PAGE_SIZE: usize = 100;

/// Default chunk size for streaming.
const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default session gap in minutes.
const DEFAULT_SESSION_GAP_MINUTES: u64 = 30;

/// Build the query spec shared by both query tools.
fn build_spec(args: &Value, ctx: &ServerContext, page_size: usize) -> Result<QuerySpec, McpError> {
    let time_range = match (opt_str(args, "start_time"), opt_str(args, "end_time")) {
        (Some(start), Some(end)) => {
            let start = DateTime::parse_from_rfc3339(start)
                .map_err(|e| McpError::invalid_params(format!("bad start_time: {e}"), "/start_time"))?;
            let end = DateTime::parse_from_rfc3339(end)
                .map_err(|e| McpError::invalid_params(format!("bad end_time: {e}"), "/end_time"))?;
            TimeRange::Absolute {
                start: start.to_utc(),
                end: end.to_utc(),
            }
        }
        _ => {
            let hours = opt_u64(args, "time_range_hours")
                .map(|h| h as u32)
                .unwrap_or(ctx.config.default_time_range_hours);
            TimeRange::LastHours(hours)
        }
    };

    let mut spec = QuerySpec::last_hours(1, page_size)
        .with_filters(&filters_of(args))
        .map_err(map_es_error)?;
    spec.time_range = time_range;
    if let Some(fields) = opt_string_array(args, "fields") {
        spec = spec.with_fields(fields);
    }
    Ok(spec)
}

/// `query_dshield_events`: filtered, projected, paginated event queries.
#[derive(Debug)]
pub struct QueryEventsHandler;

#[async_trait]
impl ToolHandler for QueryEventsHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let page_size = opt_u64(&arguments, "page_size")
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(ctx.config.max_query_results);
        let spec = build_spec(&arguments, &ctx, page_size)?;

        let selector = match opt_str(&arguments, "cursor") {
            Some(cursor) => PageSelector::Cursor(cursor.to_string()),
            None => PageSelector::Number(
                opt_u64(&arguments, "page_number").map(|v| v as usize).unwrap_or(1),
            ),
        };

        let page = ctx
            .elastic
            .query_events(&spec, &selector)
            .await
            .map_err(map_es_error)?;

        let events: Vec<Value> = page.events.iter().map(event_to_json).collect();
        let mut result = json!({
            "events": events,
            "total_hits": page.total_hits,
            "performance_metrics": page.metrics,
        });
        if let Some(info) = &page.page_info {
            result["page_info"] = serde_json::to_value(info)
                .map_err(|e| McpError::internal(e.to_string()))?;
        }
        if let Some(cursor) = &page.cursor {
            result["cursor"] = json!(cursor);
            // Retained alias for older clients; same value as `cursor`.
            result["next_page_token"] = json!(cursor);
        }
        Ok(result)
    }
}

/// `stream_dshield_events_with_session_context`: session-aligned chunked
/// scans.
#[derive(Debug)]
pub struct StreamEventsHandler;

#[async_trait]
impl ToolHandler for StreamEventsHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let session_fields = opt_string_array(&arguments, "session_fields")
            .filter(|fields| !fields.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_FIELDS.iter().map(|s| s.to_string()).collect());

        let request = StreamRequest {
            time_range_hours: opt_u64(&arguments, "time_range_hours")
                .map(|h| h as u32)
                .unwrap_or(ctx.config.default_time_range_hours),
            chunk_size: opt_u64(&arguments, "chunk_size")
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_CHUNK_SIZE)
                .min(ctx.config.max_query_results),
            session_fields,
            max_session_gap_minutes: opt_u64(&arguments, "max_session_gap_minutes")
                .unwrap_or(DEFAULT_SESSION_GAP_MINUTES) as u32,
            filters: filters_of(&arguments),
            stream_id: opt_str(&arguments, "stream_id").map(str::to_string),
        };

        let chunk = ctx
            .elastic
            .stream_events_with_session_context(request)
            .await
            .map_err(map_es_error)?;

        let events: Vec<Value> = chunk.events.iter().map(event_to_json).collect();
        Ok(json!({
            "events": events,
            "total_count_estimate": chunk.total_count_estimate,
            "next_stream_id": chunk.next_stream_id,
            "session_context": chunk.session_context,
        }))
    }
}
