//! Tool executor seam and the site-scoped tool catalog.
//!
//! Tool execution itself (clicking, typing, reading a page) lives outside
//! this crate behind [`ToolExecutor`]. This module turns whatever the
//! executor returns into a canonical `tool_result` block and decides which
//! tools are offered on the current page.

use std::sync::OnceLock;

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;

use ba_domain::config::ToolSiteRule;
use ba_domain::message::{ContentBlock, ToolDefinition};

/// Prefix an executor uses to report a failed action.
pub const ERROR_MARKER: &str = "Error:";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a tool returned. Failures are `Text` starting with [`ERROR_MARKER`];
/// they are shown to the model rather than aborting the task.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
    /// Raw bytes (a screenshot, usually) with a short caption for the model.
    Binary {
        data: Vec<u8>,
        mime_type: String,
        caption: String,
    },
}

impl ToolOutput {
    pub fn error(message: impl std::fmt::Display) -> Self {
        ToolOutput::Text(format!("{ERROR_MARKER} {message}"))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Text(t) if t.trim_start().starts_with(ERROR_MARKER))
    }
}

/// Runs tool actions against the outside world.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, input: &Value) -> ToolOutput;

    /// URL of the page the tools currently act on, used to scope the
    /// catalog. `None` offers only unrestricted tools.
    async fn page_url(&self) -> Option<String> {
        None
    }
}

/// Executor for tool-less runs. Every call is reported as an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn execute(&self, name: &str, _input: &Value) -> ToolOutput {
        ToolOutput::error(format!("tool \"{name}\" is not available"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the `tool_result` block answering `call_id`.
pub fn build_tool_result(call_id: &str, output: ToolOutput) -> ContentBlock {
    let is_error = output.is_error();
    let content = match output {
        ToolOutput::Text(text) if is_error => vec![ContentBlock::text(enrich_error(&text))],
        ToolOutput::Text(text) => vec![ContentBlock::text(text)],
        ToolOutput::Json(value) => vec![ContentBlock::text(value.to_string())],
        ToolOutput::Binary {
            data,
            mime_type,
            caption,
        } => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
            vec![
                ContentBlock::text(caption),
                ContentBlock::image(mime_type, encoded),
            ]
        }
    };
    ContentBlock::ToolResult {
        tool_call_id: call_id.to_owned(),
        content,
        is_error,
    }
}

// ── error enrichment ────────────────────────────────────────────────

struct ErrorCategory {
    pattern: &'static str,
    guidance: &'static str,
}

const ERROR_CATEGORIES: &[ErrorCategory] = &[
    ErrorCategory {
        pattern: r"(?i)permission (denied|was not granted)|not allowed|access (is )?denied|cannot access contents",
        guidance: "The extension does not have permission for this action on this site. \
Do not retry it; ask the user to grant access or continue with a different approach.",
    },
    ErrorCategory {
        pattern: r"(?i)(chrome|edge|about|chrome-extension)://|web store|restricted (page|url)|cannot be scripted",
        guidance: "This is a restricted browser page where page tools cannot run. \
Navigate to a regular web page before trying again.",
    },
];

/// Compiled patterns, each kept next to its own guidance.
fn compiled_categories() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        ERROR_CATEGORIES
            .iter()
            .filter_map(|c| match Regex::new(c.pattern) {
                Ok(re) => Some((re, c.guidance)),
                Err(e) => {
                    tracing::warn!(pattern = c.pattern, error = %e, "invalid error category pattern");
                    None
                }
            })
            .collect()
    })
}

/// Append guidance to a tool error the model cannot fix by retrying.
/// Unrecognized errors are returned unchanged.
pub fn enrich_error(error: &str) -> String {
    compiled_categories()
        .iter()
        .find(|(re, _)| re.is_match(error))
        .map(|(_, guidance)| format!("{error}\n\n{guidance}"))
        .unwrap_or_else(|| error.to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct CatalogEntry {
    definition: ToolDefinition,
    /// Empty means offered everywhere.
    hosts: Vec<String>,
}

/// The tools the model may be offered, with optional per-site scoping.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of `definitions`, scoped by the `[agent].tool_sites` rules.
    pub fn from_rules(definitions: Vec<ToolDefinition>, rules: &[ToolSiteRule]) -> Self {
        let mut catalog = Self::new();
        for def in definitions {
            let hosts = rules
                .iter()
                .filter(|r| r.tool == def.name)
                .flat_map(|r| r.hosts.iter().cloned())
                .collect();
            catalog.entries.push(CatalogEntry {
                definition: def,
                hosts,
            });
        }
        catalog
    }

    /// Add a tool offered on every page.
    pub fn with_tool(self, definition: ToolDefinition) -> Self {
        self.with_scoped_tool(definition, Vec::new())
    }

    /// Add a tool offered only on `hosts` and their subdomains.
    pub fn with_scoped_tool(mut self, definition: ToolDefinition, hosts: Vec<String>) -> Self {
        self.entries.retain(|e| e.definition.name != definition.name);
        self.entries.push(CatalogEntry { definition, hosts });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tools that apply on `page_url`, in registration order.
    pub fn definitions_for(&self, page_url: Option<&str>) -> Vec<ToolDefinition> {
        let host = page_url
            .and_then(|u| reqwest::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));

        self.entries
            .iter()
            .filter(|e| {
                e.hosts.is_empty()
                    || host
                        .as_deref()
                        .is_some_and(|h| e.hosts.iter().any(|p| host_matches(h, p)))
            })
            .map(|e| e.definition.clone())
            .collect()
    }
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches("*.").to_ascii_lowercase();
    host == pattern
        || host
            .strip_suffix(&pattern)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object"}),
        }
    }

    fn names(defs: &[ToolDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn text_output_becomes_plain_result() {
        let block = build_tool_result("c1", ToolOutput::Text("Clicked".into()));
        assert_eq!(
            block,
            ContentBlock::ToolResult {
                tool_call_id: "c1".into(),
                content: vec![ContentBlock::text("Clicked")],
                is_error: false,
            }
        );
    }

    #[test]
    fn json_output_is_stringified() {
        let block = build_tool_result("c2", ToolOutput::Json(json!({"count": 3})));
        let ContentBlock::ToolResult { content, .. } = block else {
            panic!("not a tool result");
        };
        assert_eq!(content, vec![ContentBlock::text(r#"{"count":3}"#)]);
    }

    #[test]
    fn binary_output_embeds_image_with_caption() {
        let block = build_tool_result(
            "c3",
            ToolOutput::Binary {
                data: b"png".to_vec(),
                mime_type: "image/png".into(),
                caption: "Screenshot captured".into(),
            },
        );
        let ContentBlock::ToolResult { content, is_error, .. } = block else {
            panic!("not a tool result");
        };
        assert!(!is_error);
        assert_eq!(content[0], ContentBlock::text("Screenshot captured"));
        assert_eq!(content[1], ContentBlock::image("image/png", "cG5n"));
    }

    #[test]
    fn error_text_is_flagged_and_enriched() {
        let block = build_tool_result(
            "c4",
            ToolOutput::Text("Error: Cannot access contents of url \"chrome://settings\"".into()),
        );
        let ContentBlock::ToolResult { content, is_error, .. } = block else {
            panic!("not a tool result");
        };
        assert!(is_error);
        let text = content[0].as_text().unwrap();
        assert!(text.starts_with("Error: Cannot access contents"));
        assert!(text.contains("Do not retry"));
    }

    #[test]
    fn restricted_page_guidance() {
        let out = enrich_error("Error: The extensions gallery cannot be scripted.");
        assert!(out.contains("restricted browser page"));
    }

    #[test]
    fn every_category_compiles_with_its_own_guidance() {
        let compiled = compiled_categories();
        assert_eq!(compiled.len(), ERROR_CATEGORIES.len());
        for ((re, guidance), category) in compiled.iter().zip(ERROR_CATEGORIES) {
            assert_eq!(re.as_str(), category.pattern);
            assert_eq!(*guidance, category.guidance);
        }
    }

    #[test]
    fn unknown_errors_pass_through_unchanged() {
        let msg = "Error: element #submit not found";
        assert_eq!(enrich_error(msg), msg);
    }

    #[test]
    fn unscoped_tools_are_always_offered() {
        let catalog = ToolCatalog::new().with_tool(def("click")).with_tool(def("type"));
        assert_eq!(names(&catalog.definitions_for(None)), vec!["click", "type"]);
    }

    #[test]
    fn scoped_tools_follow_the_page_host() {
        let catalog = ToolCatalog::from_rules(
            vec![def("click"), def("sheet_edit")],
            &[ToolSiteRule {
                tool: "sheet_edit".into(),
                hosts: vec!["docs.google.com".into()],
            }],
        );

        let on_docs = catalog.definitions_for(Some("https://docs.google.com/spreadsheets/d/1"));
        assert_eq!(names(&on_docs), vec!["click", "sheet_edit"]);

        let elsewhere = catalog.definitions_for(Some("https://example.com/"));
        assert_eq!(names(&elsewhere), vec!["click"]);

        let unknown = catalog.definitions_for(None);
        assert_eq!(names(&unknown), vec!["click"]);
    }

    #[test]
    fn subdomains_match_but_lookalikes_do_not() {
        assert!(host_matches("mail.example.com", "example.com"));
        assert!(host_matches("example.com", "*.example.com"));
        assert!(!host_matches("badexample.com", "example.com"));
    }

    #[tokio::test]
    async fn no_tools_reports_an_error() {
        let out = NoTools.execute("click", &json!({})).await;
        assert!(out.is_error());
    }
}
