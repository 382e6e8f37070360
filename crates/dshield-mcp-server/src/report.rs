//! Attack-report rendering.
//!
//! The renderer sits behind a trait so the handler and its tests do not need
//! a TeX toolchain; the production implementation shells out to `latexmk`
//! (or `pdflatex`) on a blocking worker thread.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use tracing::{debug, error};

use dshield_mcp_protocol::McpError;

use crate::campaign::CampaignRecord;

/// Outcome of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutput {
    /// Where the rendered report landed.
    pub report_path: String,
    /// Template that produced it.
    pub template: String,
}

/// Renders a campaign record into a report document.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render `campaign`, optionally with a named template, optionally to a
    /// caller-chosen path.
    async fn render(
        &self,
        campaign: &CampaignRecord,
        template_name: Option<&str>,
        output_path: Option<&str>,
    ) -> Result<ReportOutput, McpError>;
}

/// The LaTeX-backed renderer.
#[derive(Debug)]
pub struct LatexRenderer {
    work_dir: PathBuf,
}

impl LatexRenderer {
    /// Renderer working under `work_dir` (defaults to the system temp dir).
    pub fn new(work_dir: Option<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    fn tex_source(campaign: &CampaignRecord, template: &str) -> String {
        let mut sources = String::new();
        for (ip, count) in &campaign.top_sources {
            sources.push_str(&format!("{} & {} \\\\\n", escape_latex(ip), count));
        }
        let iocs = campaign
            .seed_iocs
            .iter()
            .map(|i| escape_latex(i))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "\\documentclass{{article}}\n\
             \\usepackage[margin=1in]{{geometry}}\n\
             \\title{{Attack Report: {id} ({template})}}\n\
             \\date{{{date}}}\n\
             \\begin{{document}}\n\
             \\maketitle\n\
             \\section*{{Summary}}\n\
             Seed indicators: {iocs}.\\\\\n\
             Matched events: {events}.\\\\\n\
             Window: {window} minutes.\n\
             \\section*{{Top Sources}}\n\
             \\begin{{tabular}}{{lr}}\n\
             Source & Events \\\\\n\\hline\n{sources}\
             \\end{{tabular}}\n\
             \\end{{document}}\n",
            id = escape_latex(&campaign.campaign_id),
            template = escape_latex(template),
            date = campaign.analyzed_at.format("%Y-%m-%d"),
            events = campaign.event_count,
            window = campaign.correlation_window_minutes,
        )
    }

    fn run_tex(work_dir: &Path, tex_file: &Path) -> Result<PathBuf, String> {
        let file_name = tex_file
            .file_name()
            .ok_or_else(|| "invalid tex file name".to_string())?;

        let attempts: [(&str, Vec<&str>); 2] = [
            ("latexmk", vec!["-pdf", "-interaction=nonstopmode"]),
            ("pdflatex", vec!["-interaction=nonstopmode"]),
        ];
        for (binary, base_args) in attempts {
            let status = Command::new(binary)
                .args(&base_args)
                .arg(file_name)
                .current_dir(work_dir)
                .output();
            match status {
                Ok(output) if output.status.success() => {
                    return Ok(tex_file.with_extension("pdf"));
                }
                Ok(output) => {
                    debug!(
                        binary,
                        code = output.status.code(),
                        "TeX run failed, trying next binary"
                    );
                }
                Err(err) => debug!(binary, %err, "TeX binary not runnable"),
            }
        }
        Err("no TeX binary produced a PDF".to_string())
    }
}

#[async_trait]
impl ReportRenderer for LatexRenderer {
    async fn render(
        &self,
        campaign: &CampaignRecord,
        template_name: Option<&str>,
        output_path: Option<&str>,
    ) -> Result<ReportOutput, McpError> {
        let template = template_name.unwrap_or("standard").to_string();
        let work_dir = self.work_dir.join(format!("report-{}", campaign.campaign_id));
        let tex_path = work_dir.join("report.tex");
        let source = Self::tex_source(campaign, &template);
        let requested_output = output_path.map(str::to_string);

        // TeX toolchains block; run the whole pipeline on a worker thread.
        let rendered = tokio::task::spawn_blocking(move || -> Result<PathBuf, String> {
            std::fs::create_dir_all(&work_dir).map_err(|e| e.to_string())?;
            std::fs::write(&tex_path, source).map_err(|e| e.to_string())?;
            let pdf = Self::run_tex(&work_dir, &tex_path)?;
            if let Some(target) = requested_output {
                let target = PathBuf::from(target);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                std::fs::copy(&pdf, &target).map_err(|e| e.to_string())?;
                return Ok(target);
            }
            Ok(pdf)
        })
        .await
        .map_err(|e| {
            error!(%e, "report worker panicked");
            McpError::internal("report rendering failed")
        })?
        .map_err(|reason| {
            error!(reason, "report rendering failed");
            McpError::internal("report rendering failed")
        })?;

        Ok(ReportOutput {
            report_path: rendered.display().to_string(),
            template,
        })
    }
}

/// Escape characters LaTeX treats specially.
fn escape_latex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn campaign() -> CampaignRecord {
        CampaignRecord {
            campaign_id: "campaign-ab12".to_string(),
            seed_iocs: vec!["192.0.2.1".to_string(), "evil_domain.example".to_string()],
            correlation_window_minutes: 120,
            time_range: None,
            event_count: 420,
            first_seen: None,
            last_seen: None,
            top_sources: vec![("192.0.2.1".to_string(), 400)],
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn test_escape_latex() {
        assert_eq!(escape_latex("a_b&c%d"), "a\\_b\\&c\\%d");
        assert_eq!(escape_latex("~^"), "\\textasciitilde{}\\textasciicircum{}");
        assert_eq!(escape_latex("plain"), "plain");
    }

    #[test]
    fn test_tex_source_contains_campaign_facts() {
        let source = LatexRenderer::tex_source(&campaign(), "standard");
        assert!(source.contains("campaign-ab12"));
        assert!(source.contains("Matched events: 420"));
        assert!(source.contains("evil\\_domain.example"));
        assert!(source.contains("\\begin{document}"));
    }
}
