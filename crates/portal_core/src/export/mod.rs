//! Proposal export and template rendering.
//!
//! HTML and markdown are rendered here. PDF uses the bundled [`pdf`]
//! writer; DOCX is left to an optional [`BinaryExporter`] collaborator.

pub mod pdf;

use std::sync::LazyLock;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;

use crate::error::PortalError;
use crate::types::Proposal;
use crate::upload::sanitize_filename;

pub const COMPANY_NAME: &str = "JDA Digital Agency";

const EXPORT_TEMPLATE: &str = "proposal_export";
const GENERATED_TEMPLATE: &str = "generated_content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Html,
    Markdown,
    Pdf,
    Docx,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Some(Self::Html),
            "markdown" | "md" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "md",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

/// Finished export, ready to stream as a download.
#[derive(Debug, Clone)]
pub struct RenderedExport {
    pub format: ExportFormat,
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Pluggable renderer for binary formats not produced locally.
pub trait BinaryExporter: Send + Sync {
    fn supports(&self, format: ExportFormat) -> bool;

    /// `html` is the full standalone export document.
    fn render(&self, format: ExportFormat, proposal: &Proposal, html: &str) -> Result<Vec<u8>, PortalError>;
}

pub fn export_filename(proposal: &Proposal, format: ExportFormat) -> String {
    sanitize_filename(&format!(
        "{}_{}_proposal.{}",
        proposal.project_name,
        proposal.client_name,
        format.file_extension()
    ))
}

#[derive(Serialize)]
struct ExportContext<'a> {
    project_name: &'a str,
    client_name: &'a str,
    phase: &'a str,
    status: &'a str,
    created_at: String,
    updated_at: String,
    content: &'a str,
    include_metadata: bool,
    company_name: &'a str,
}

/// Inputs for template-based content generation.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedContentContext {
    pub project_name: String,
    pub client_name: String,
    pub phase: String,
    pub date: String,
    pub scope: String,
    pub timeline: String,
    pub deliverables: Vec<String>,
    pub budget_range: Option<String>,
    pub custom_sections: Vec<CustomSection>,
    pub company_name: String,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
pub struct CustomSection {
    pub title: String,
    pub body: String,
}

/// Holds the compiled templates; build once and share.
pub struct DocumentRenderer {
    handlebars: Handlebars<'static>,
    binary: Option<std::sync::Arc<dyn BinaryExporter>>,
}

impl DocumentRenderer {
    pub fn new() -> Result<Self, PortalError> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(EXPORT_TEMPLATE, EXPORT_HTML)
            .map_err(|e| anyhow!(e))?;
        handlebars
            .register_template_string(GENERATED_TEMPLATE, GENERATED_HTML)
            .map_err(|e| anyhow!(e))?;
        Ok(Self {
            handlebars,
            binary: None,
        })
    }

    /// Attach a renderer for formats (e.g. DOCX) not produced locally.
    pub fn with_binary_exporter(mut self, exporter: std::sync::Arc<dyn BinaryExporter>) -> Self {
        self.binary = Some(exporter);
        self
    }

    pub fn render_html(&self, proposal: &Proposal, include_metadata: bool) -> Result<String, PortalError> {
        let ctx = ExportContext {
            project_name: &proposal.project_name,
            client_name: &proposal.client_name,
            phase: proposal.phase.as_str(),
            status: proposal.status.as_str(),
            created_at: format_date(proposal.created_at),
            updated_at: format_date(proposal.updated_at),
            content: &proposal.content,
            include_metadata,
            company_name: COMPANY_NAME,
        };
        self.handlebars
            .render(EXPORT_TEMPLATE, &ctx)
            .map_err(|e| PortalError::Internal(anyhow!(e)))
    }

    pub fn render_markdown(&self, proposal: &Proposal, include_metadata: bool) -> String {
        let mut out = format!("# {}\n\n", proposal.project_name);
        if include_metadata {
            out.push_str(&format!(
                "| Field | Value |\n|---|---|\n| Client | {} |\n| Phase | {} |\n| Status | {} |\n| Created | {} |\n| Updated | {} |\n\n",
                proposal.client_name,
                proposal.phase,
                proposal.status,
                format_date(proposal.created_at),
                format_date(proposal.updated_at),
            ));
        }
        out.push_str(&html_to_markdown(&proposal.content));
        out.push('\n');
        out
    }

    pub fn export(
        &self,
        proposal: &Proposal,
        format: ExportFormat,
        include_metadata: bool,
    ) -> Result<RenderedExport, PortalError> {
        let bytes = match format {
            ExportFormat::Html => self.render_html(proposal, include_metadata)?.into_bytes(),
            ExportFormat::Markdown => self.render_markdown(proposal, include_metadata).into_bytes(),
            ExportFormat::Pdf => {
                let text = self.render_markdown(proposal, include_metadata);
                pdf::render_text_pdf(&proposal.project_name, &text)?
            }
            ExportFormat::Docx => match &self.binary {
                Some(exporter) if exporter.supports(format) => {
                    let html = self.render_html(proposal, include_metadata)?;
                    exporter.render(format, proposal, &html)?
                }
                _ => {
                    return Err(PortalError::ExportUnavailable(format!(
                        "no renderer configured for {}",
                        format.as_str()
                    )))
                }
            },
        };
        Ok(RenderedExport {
            format,
            content_type: format.content_type(),
            filename: export_filename(proposal, format),
            bytes,
        })
    }

    pub fn render_generated(&self, ctx: &GeneratedContentContext) -> Result<String, PortalError> {
        self.handlebars
            .render(GENERATED_TEMPLATE, ctx)
            .map_err(|e| PortalError::Internal(anyhow!(e)))
    }
}

pub fn format_date(at: DateTime<Utc>) -> String {
    at.format("%B %d, %Y").to_string()
}

/// `in_review` -> `In review`.
pub fn title_case(value: &str) -> String {
    let s = value.replace('_', " ");
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => s,
    }
}

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").expect("valid regex"));
static STRONG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(strong|b)(\s[^>]*)?>").expect("valid regex"));
static EM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(em|i)(\s[^>]*)?>").expect("valid regex"));
static LI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<li[^>]*>").expect("valid regex"));
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</li>|</tr>").expect("valid regex")
});
static BLOCK_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(p|div|ul|ol|table|section)>").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Best-effort HTML to markdown for proposal bodies.
pub fn html_to_markdown(html: &str) -> String {
    let text = HEADING_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("\n{} {}\n\n", "#".repeat(level), caps[2].trim())
    });
    let text = STRONG_RE.replace_all(&text, "**");
    let text = EM_RE.replace_all(&text, "*");
    let text = LI_RE.replace_all(&text, "- ");
    let text = BREAK_RE.replace_all(&text, "\n");
    let text = BLOCK_END_RE.replace_all(&text, "\n\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    BLANK_LINES_RE
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

const EXPORT_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{{project_name}} - Proposal</title>
<style>
body { font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; line-height: 1.6; color: #333; max-width: 960px; margin: 0 auto; padding: 20px; }
header { border-bottom: 2px solid #3498db; margin-bottom: 30px; }
h1 { color: #2c3e50; }
.metadata { background: #f8f9fa; padding: 20px; border-left: 4px solid #3498db; margin-bottom: 30px; }
.metadata th { text-align: left; padding-right: 20px; }
</style>
</head>
<body>
<header>
<h1>{{project_name}}</h1>
<p>Prepared for {{client_name}} by {{company_name}}</p>
</header>
{{#if include_metadata}}
<section class="metadata">
<table>
<tr><th>Project</th><td>{{project_name}}</td></tr>
<tr><th>Client</th><td>{{client_name}}</td></tr>
<tr><th>Phase</th><td>{{phase}}</td></tr>
<tr><th>Status</th><td>{{status}}</td></tr>
<tr><th>Created</th><td>{{created_at}}</td></tr>
<tr><th>Updated</th><td>{{updated_at}}</td></tr>
</table>
</section>
{{/if}}
<main>
{{{content}}}
</main>
</body>
</html>
"#;

const GENERATED_HTML: &str = r#"<section class="proposal-overview">
<h2>Project Overview</h2>
<p><strong>{{project_name}}</strong> for {{client_name}}, prepared by {{company_name}} on {{date}}.</p>
<p>Current phase: {{phase}}</p>
</section>
<section class="proposal-scope">
<h2>Scope</h2>
<p>{{scope}}</p>
</section>
<section class="proposal-timeline">
<h2>Timeline</h2>
<p>{{timeline}}</p>
</section>
<section class="proposal-deliverables">
<h2>Deliverables</h2>
{{#if deliverables}}
<ul>
{{#each deliverables}}
<li>{{this}}</li>
{{/each}}
</ul>
{{else}}
<p>Deliverables to be defined based on detailed requirements.</p>
{{/if}}
</section>
{{#if budget_range}}
<section class="proposal-budget">
<h2>Investment</h2>
<p>{{budget_range}}</p>
</section>
{{/if}}
{{#each custom_sections}}
<section class="proposal-custom">
<h2>{{title}}</h2>
<p>{{body}}</p>
</section>
{{/each}}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProjectPhase, ProposalStatus};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn proposal() -> Proposal {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap();
        Proposal {
            id: Uuid::new_v4(),
            project_name: "Data Platform".into(),
            client_name: "Acme & Sons".into(),
            phase: ProjectPhase::Discovery,
            status: ProposalStatus::Approved,
            content: "<h2>Goals</h2><p>Ship <strong>fast</strong>.</p><ul><li>One</li><li>Two</li></ul>".into(),
            requirements: None,
            created_by: Uuid::new_v4(),
            assigned_to: None,
            client_user_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::from_str("PDF"), Some(ExportFormat::Pdf));
        assert_eq!(ExportFormat::from_str("md"), Some(ExportFormat::Markdown));
        assert_eq!(ExportFormat::from_str("odt"), None);
    }

    #[test]
    fn filename_is_sanitized() {
        assert_eq!(
            export_filename(&proposal(), ExportFormat::Pdf),
            "Data_Platform_Acme___Sons_proposal.pdf"
        );
    }

    #[test]
    fn html_export_escapes_metadata_but_not_content() {
        let r = DocumentRenderer::new().unwrap();
        let html = r.render_html(&proposal(), true).unwrap();
        assert!(html.contains("Acme &amp; Sons"));
        assert!(html.contains("<strong>fast</strong>"));
        assert!(html.contains("<th>Phase</th><td>discovery</td>"));
        assert!(html.contains("March 04, 2025"));
    }

    #[test]
    fn html_export_without_metadata() {
        let r = DocumentRenderer::new().unwrap();
        let html = r.render_html(&proposal(), false).unwrap();
        assert!(!html.contains("class=\"metadata\""));
    }

    #[test]
    fn markdown_conversion() {
        let md = html_to_markdown(&proposal().content);
        assert!(md.starts_with("## Goals"));
        assert!(md.contains("Ship **fast**."));
        assert!(md.contains("- One\n- Two"));
        assert!(!md.contains('<'));
    }

    #[test]
    fn markdown_export_includes_metadata_table() {
        let r = DocumentRenderer::new().unwrap();
        let md = r.render_markdown(&proposal(), true);
        assert!(md.starts_with("# Data Platform"));
        assert!(md.contains("| Status | approved |"));
    }

    #[test]
    fn docx_without_collaborator_is_unavailable() {
        let r = DocumentRenderer::new().unwrap();
        let err = r.export(&proposal(), ExportFormat::Docx, true).unwrap_err();
        assert!(matches!(err, PortalError::ExportUnavailable(_)));
    }

    struct FakeDocx;

    impl BinaryExporter for FakeDocx {
        fn supports(&self, format: ExportFormat) -> bool {
            format == ExportFormat::Docx
        }

        fn render(&self, _: ExportFormat, _: &Proposal, html: &str) -> Result<Vec<u8>, PortalError> {
            Ok(html.len().to_string().into_bytes())
        }
    }

    #[test]
    fn docx_delegates_to_collaborator() {
        let r = DocumentRenderer::new()
            .unwrap()
            .with_binary_exporter(std::sync::Arc::new(FakeDocx));
        let out = r.export(&proposal(), ExportFormat::Docx, false).unwrap();
        assert_eq!(out.filename, "Data_Platform_Acme___Sons_proposal.docx");
        assert!(!out.bytes.is_empty());
    }

    #[test]
    fn pdf_export_has_pdf_header() {
        let r = DocumentRenderer::new().unwrap();
        let out = r.export(&proposal(), ExportFormat::Pdf, true).unwrap();
        assert_eq!(out.content_type, "application/pdf");
        assert!(out.bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn generated_content_lists_deliverables() {
        let r = DocumentRenderer::new().unwrap();
        let html = r
            .render_generated(&GeneratedContentContext {
                project_name: "Portal".into(),
                client_name: "Acme".into(),
                phase: "Discovery".into(),
                date: "March 04, 2025".into(),
                scope: "Build a portal".into(),
                timeline: "12 weeks".into(),
                deliverables: vec!["API".into(), "<UI>".into()],
                budget_range: None,
                custom_sections: vec![CustomSection {
                    title: "Team".into(),
                    body: "Two engineers".into(),
                }],
                company_name: COMPANY_NAME.into(),
            })
            .unwrap();
        assert!(html.contains("<li>API</li>"));
        assert!(html.contains("<li>&lt;UI&gt;</li>"));
        assert!(html.contains("<h2>Team</h2>"));
        assert!(!html.contains("Investment"));
    }

    #[test]
    fn title_case_replaces_underscores() {
        assert_eq!(title_case("in_review"), "In review");
        assert_eq!(title_case(""), "");
    }
}
