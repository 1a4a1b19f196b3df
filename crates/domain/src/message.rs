//! Canonical wire model.
//!
//! Every provider adapter converts to and from these types; nothing outside
//! the adapters ever sees a provider-specific message shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: Value,
}

/// A message in the conversation (provider-agnostic).
///
/// Tool results travel under the `user` role by convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        /// Text and image blocks only.
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },
}

/// Borrowed view of a `tool_call` block.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub input: &'a Value,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self { role: Role::User, content }
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// True when any block is an image, including images inside tool results.
    pub fn has_image(&self) -> bool {
        self.content.iter().any(ContentBlock::contains_image)
    }

    /// Concatenate every text block (including text nested in tool results).
    pub fn extract_all_text(&self) -> String {
        let mut out = Vec::new();
        for block in &self.content {
            block.collect_text(&mut out);
        }
        out.join("\n")
    }

    /// Tool calls in the order the model emitted them.
    pub fn tool_calls(&self) -> impl Iterator<Item = ToolCallRef<'_>> {
        self.content.iter().filter_map(ContentBlock::as_tool_call)
    }

    pub fn has_tool_results(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ContentBlock::Image {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn tool_result_text(
        tool_call_id: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: vec![ContentBlock::text(text)],
            is_error,
        }
    }

    pub fn as_tool_call(&self) -> Option<ToolCallRef<'_>> {
        match self {
            ContentBlock::ToolCall { id, name, input } => Some(ToolCallRef { id, name, input }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentBlock::Image { .. })
    }

    /// True for an image block, or a tool result carrying one.
    pub fn contains_image(&self) -> bool {
        match self {
            ContentBlock::Image { .. } => true,
            ContentBlock::ToolResult { content, .. } => content.iter().any(ContentBlock::is_image),
            _ => false,
        }
    }

    fn collect_text(&self, out: &mut Vec<String>) {
        match self {
            ContentBlock::Text { text } if !text.is_empty() => out.push(text.clone()),
            ContentBlock::ToolResult { content, .. } => {
                for inner in content {
                    inner.collect_text(out);
                }
            }
            _ => {}
        }
    }
}
