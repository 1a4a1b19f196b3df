//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including tool use, streaming, and
//! the Anthropic-specific message structure where the system prompt goes in
//! a separate top-level `system` field.

use crate::traits::{
    ChatRequest, ChatResponse, Credential, Endpoint, ProviderAdapter, StreamDecoder, WireRequest,
    LEADING_USER_TURN,
};
use crate::util::host_matches;
use ba_domain::error::{Error, Result};
use ba_domain::message::{ContentBlock, Message, Role, ToolDefinition};
use ba_domain::stream::{StopReason, Usage};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Beta flag required when authenticating with an OAuth access token.
const OAUTH_BETA: &str = "oauth-2025-04-20";
/// Anthropic rejects empty text blocks.
const EMPTY_TEXT_PLACEHOLDER: &str = "(no content)";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapter for the Anthropic Messages API.
#[derive(Debug, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn matches(&self, endpoint_url: &str) -> bool {
        host_matches(endpoint_url, "anthropic.com")
    }

    fn headers(&self, credential: &Credential) -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("anthropic-version".into(), ANTHROPIC_VERSION.into());
        h.insert("content-type".into(), "application/json".into());
        match credential {
            Credential::ApiKey(key) => {
                h.insert("x-api-key".into(), key.clone());
            }
            Credential::Bearer(token) => {
                h.insert("authorization".into(), format!("Bearer {token}"));
                h.insert("anthropic-beta".into(), OAUTH_BETA.into());
            }
            Credential::None => {}
        }
        h
    }

    fn build_request(
        &self,
        endpoint: &Endpoint,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<WireRequest> {
        let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
        if req.messages.first().map(|m| m.role) == Some(Role::Assistant) {
            messages.push(json!({
                "role": "user",
                "content": [{"type": "text", "text": LEADING_USER_TURN}],
            }));
        }
        messages.extend(req.messages.iter().map(msg_to_anthropic));

        let mut body = json!({
            "model": endpoint.model_for(req),
            "max_tokens": endpoint.max_tokens_for(req),
            "messages": messages,
            "stream": stream,
        });

        if let Some(system) = req.system.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = Value::String(system.to_string());
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }

        Ok(WireRequest {
            url: format!("{}/v1/messages", endpoint.base_url),
            headers: BTreeMap::new(),
            body,
            stream,
        })
    }

    fn decode_body(&self, body: &str) -> Result<ChatResponse> {
        let v: Value = serde_json::from_str(body)?;
        parse_anthropic_response(&v)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(AnthropicStream::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_anthropic(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let mut content: Vec<Value> = msg.content.iter().filter_map(block_to_anthropic).collect();
    if content.is_empty() {
        content.push(json!({"type": "text", "text": EMPTY_TEXT_PLACEHOLDER}));
    }
    json!({ "role": role, "content": content })
}

fn block_to_anthropic(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::Image { media_type, data } => Some(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": media_type,
                "data": data,
            }
        })),
        ContentBlock::ToolCall { id, name, input } => Some(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        })),
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            let inner: Vec<Value> = content.iter().filter_map(block_to_anthropic).collect();
            let mut v = json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": inner,
            });
            if *is_error {
                v["is_error"] = Value::Bool(true);
            }
            Some(v)
        }
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_stop_reason(s: &str, has_tool_calls: bool) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "end_turn" | "stop_sequence" => StopReason::EndTurn,
        _ if has_tool_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn parse_anthropic_response(body: &Value) -> Result<ChatResponse> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut content = Vec::with_capacity(blocks.len());
    for block in &blocks {
        match block.get("type").and_then(Value::as_str).unwrap_or("") {
            "text" => {
                let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                content.push(ContentBlock::text(text));
            }
            "tool_use" => content.push(ContentBlock::ToolCall {
                id: str_field(block, "id"),
                name: str_field(block, "name"),
                input: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            // thinking, redacted_thinking, server tool blocks: not canonical.
            _ => {}
        }
    }

    let has_tool_calls = content.iter().any(|b| b.as_tool_call().is_some());
    let stop_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(|s| map_stop_reason(s, has_tool_calls))
        .unwrap_or(if has_tool_calls {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        });

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let usage = body.get("usage").and_then(parse_anthropic_usage);

    Ok(ChatResponse::new(content, stop_reason, usage, model))
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
    })
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A content block between its start and stop events.
enum OpenBlock {
    Text(String),
    ToolCall { id: String, name: String, args: String },
}

/// Assembles content blocks from `content_block_*` events. A block only
/// becomes part of the response on its `content_block_stop`.
#[derive(Default)]
struct AnthropicStream {
    open: HashMap<u64, OpenBlock>,
    /// Finalized blocks keyed by their stream index.
    closed: BTreeMap<u64, ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
    model: String,
}

impl StreamDecoder for AnthropicStream {
    fn on_data(&mut self, data: &str, on_delta: &mut dyn FnMut(&str)) -> Result<()> {
        let v: Value = serde_json::from_str(data)
            .map_err(|e| Error::MalformedEvent(format!("anthropic: {e}")))?;

        match v.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(msg) = v.get("message") {
                    self.model = str_field(msg, "model");
                    self.usage = msg.get("usage").and_then(parse_anthropic_usage);
                }
            }

            "content_block_start" => {
                let idx = index_of(&v)?;
                let block = v
                    .get("content_block")
                    .ok_or_else(|| Error::MalformedEvent("content_block_start without block".into()))?;
                match block.get("type").and_then(Value::as_str).unwrap_or("") {
                    "text" => {
                        let initial = block.get("text").and_then(Value::as_str).unwrap_or("");
                        if !initial.is_empty() {
                            on_delta(initial);
                        }
                        self.open.insert(idx, OpenBlock::Text(initial.to_string()));
                    }
                    "tool_use" => {
                        self.open.insert(
                            idx,
                            OpenBlock::ToolCall {
                                id: str_field(block, "id"),
                                name: str_field(block, "name"),
                                args: String::new(),
                            },
                        );
                    }
                    _ => {}
                }
            }

            "content_block_delta" => {
                let idx = index_of(&v)?;
                let Some(delta) = v.get("delta") else {
                    return Err(Error::MalformedEvent("content_block_delta without delta".into()));
                };
                match (delta.get("type").and_then(Value::as_str), self.open.get_mut(&idx)) {
                    (Some("text_delta"), Some(OpenBlock::Text(buf))) => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                buf.push_str(text);
                                on_delta(text);
                            }
                        }
                    }
                    (Some("input_json_delta"), Some(OpenBlock::ToolCall { args, .. })) => {
                        if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                            args.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }

            "content_block_stop" => {
                let idx = index_of(&v)?;
                match self.open.remove(&idx) {
                    Some(OpenBlock::Text(text)) => {
                        self.closed.insert(idx, ContentBlock::Text { text });
                    }
                    Some(OpenBlock::ToolCall { id, name, args }) => {
                        let input = parse_tool_args(&name, &args);
                        self.closed.insert(idx, ContentBlock::ToolCall { id, name, input });
                    }
                    None => {}
                }
            }

            "message_delta" => {
                if let Some(reason) = v.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = v.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    let usage = self.usage.get_or_insert_with(Usage::default);
                    usage.output_tokens = output as u32;
                }
            }

            "error" => {
                let message = v
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown stream error");
                return Err(Error::Provider {
                    provider: "anthropic".into(),
                    status: None,
                    message: message.to_string(),
                });
            }

            // ping, message_stop, unknown event types -- ignore.
            _ => {}
        }

        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<ChatResponse> {
        if !self.open.is_empty() {
            tracing::warn!(
                open_blocks = self.open.len(),
                "anthropic stream ended with unclosed content blocks, dropping them"
            );
        }
        let content: Vec<ContentBlock> = self.closed.into_values().collect();
        let has_tool_calls = content.iter().any(|b| b.as_tool_call().is_some());
        let stop_reason = match self.stop_reason.as_deref() {
            Some(s) => map_stop_reason(s, has_tool_calls),
            None if has_tool_calls => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };
        Ok(ChatResponse::new(content, stop_reason, self.usage, self.model))
    }
}

fn index_of(v: &Value) -> Result<u64> {
    v.get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::MalformedEvent("event without index".into()))
}

/// Parse streamed tool arguments. An empty buffer means `{}`.
pub(crate) fn parse_tool_args(tool: &str, args: &str) -> Value {
    if args.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str(args) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(tool = %tool, error = %e, "unparsable tool arguments, sending {{}}");
            json!({})
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
