//! Enrichment-category tools.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use dshield_mcp_protocol::McpError;

use crate::context::ServerContext;
use crate::dispatch::ToolHandler;
use crate::error::map_dshield_error;
use crate::handlers::{opt_str, opt_string_array};

/// `enrich_ip_with_dshield`: single-address or batch reputation lookups.
#[derive(Debug)]
pub struct EnrichIpHandler;

fn parse_ips(raw: Vec<String>, pointer: &str) -> Result<Vec<String>, McpError> {
    let mut out = Vec::with_capacity(raw.len());
    for (index, candidate) in raw.into_iter().enumerate() {
        let trimmed = candidate.trim().to_string();
        if trimmed.parse::<IpAddr>().is_err() {
            return Err(McpError::invalid_params(
                format!("'{trimmed}' is not a valid IP address"),
                format!("{pointer}/{index}"),
            ));
        }
        out.push(trimmed);
    }
    Ok(out)
}

#[async_trait]
impl ToolHandler for EnrichIpHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let single = opt_str(&arguments, "ip_address").map(str::to_string);
        let batch = opt_string_array(&arguments, "ip_addresses");

        match (single, batch) {
            (Some(ip), None) => {
                let ips = parse_ips(vec![ip], "/ip_address")?;
                let record = ctx
                    .dshield
                    .enrich_ip(&ips[0])
                    .await
                    .map_err(map_dshield_error)?;
                Ok(json!({ "enrichment": record.as_ref() }))
            }
            (None, Some(ips)) => {
                let ips = parse_ips(ips, "/ip_addresses")?;
                if ips.len() > ctx.config.ip_batch_limit {
                    return Err(McpError::invalid_params(
                        format!(
                            "batch of {} exceeds the enrichment limit of {}",
                            ips.len(),
                            ctx.config.ip_batch_limit
                        ),
                        "/ip_addresses",
                    ));
                }
                let records = ctx
                    .dshield
                    .enrich_batch(&ips)
                    .await
                    .map_err(map_dshield_error)?;
                let enrichments: Vec<Value> = records
                    .iter()
                    .map(|r| serde_json::to_value(r.as_ref()).unwrap_or(Value::Null))
                    .collect();
                Ok(json!({ "enrichments": enrichments, "count": enrichments.len() }))
            }
            (Some(_), Some(_)) => Err(McpError::invalid_params(
                "provide either ip_address or ip_addresses, not both",
                "/ip_address",
            )),
            (None, None) => Err(McpError::invalid_params(
                "one of ip_address or ip_addresses is required",
                "/ip_address",
            )),
        }
    }
}
