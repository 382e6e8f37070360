//! Reporting-category tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use dshield_mcp_protocol::McpError;

use crate::context::ServerContext;
use crate::dispatch::ToolHandler;
use crate::handlers::{opt_str, required_str};

/// `generate_attack_report`: render an analyzed campaign to a document.
#[derive(Debug)]
pub struct AttackReportHandler;

#[async_trait]
impl ToolHandler for AttackReportHandler {
    async fn call(&self, arguments: Value, ctx: Arc<ServerContext>) -> Result<Value, McpError> {
        let campaign_id = required_str(&arguments, "campaign_id")?;
        let campaign = ctx.campaigns.get(campaign_id).ok_or_else(|| {
            McpError::invalid_params(
                format!("unknown campaign '{campaign_id}'; run analyze_campaign first"),
                "/campaign_id",
            )
        })?;

        let output = ctx
            .renderer
            .render(
                &campaign,
                opt_str(&arguments, "template_name"),
                opt_str(&arguments, "output_path"),
            )
            .await?;

        Ok(json!({
            "campaign_id": campaign.campaign_id,
            "report_path": output.report_path,
            "template": output.template,
        }))
    }
}
