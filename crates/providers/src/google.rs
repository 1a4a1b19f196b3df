//! Google Gemini adapter.
//!
//! Gemini differs from the other backends in three ways that matter here:
//! function calls carry no ids (we mint `call_<uuid>` ones), function
//! responses are matched by *name*, and tool schemas must be a restricted
//! single-type subset of JSON Schema.

use crate::schema::sanitize_schema;
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
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapter for the Gemini `generateContent` API.
#[derive(Debug, Default)]
pub struct GoogleAdapter;

impl GoogleAdapter {
    fn model_url(endpoint: &Endpoint, model: &str, stream: bool) -> String {
        let base = &endpoint.base_url;
        let root = if base.ends_with("/v1beta") || base.ends_with("/v1") {
            base.clone()
        } else {
            format!("{base}/v1beta")
        };
        if stream {
            format!("{root}/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{root}/models/{model}:generateContent")
        }
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    fn matches(&self, endpoint_url: &str) -> bool {
        host_matches(endpoint_url, "generativelanguage.googleapis.com")
    }

    fn headers(&self, credential: &Credential) -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("content-type".into(), "application/json".into());
        match credential {
            // Header rather than `?key=` so the key never lands in logged URLs.
            Credential::ApiKey(key) => {
                h.insert("x-goog-api-key".into(), key.clone());
            }
            Credential::Bearer(token) => {
                h.insert("authorization".into(), format!("Bearer {token}"));
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
        let model = endpoint.model_for(req);
        let names = tool_names_by_id(&req.messages);

        let mut contents: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
        if req.messages.first().map(|m| m.role) == Some(Role::Assistant) {
            contents.push(json!({"role": "user", "parts": [{"text": LEADING_USER_TURN}]}));
        }
        for msg in &req.messages {
            let parts = parts_for(msg, &names);
            if parts.is_empty() {
                continue;
            }
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            contents.push(json!({"role": role, "parts": parts}));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": endpoint.max_tokens_for(req)},
        });

        if let Some(system) = req.system.as_deref().filter(|s| !s.is_empty()) {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !req.tools.is_empty() {
            let decls: Vec<Value> = req.tools.iter().map(tool_to_gemini).collect();
            body["tools"] = json!([{"functionDeclarations": decls}]);
        }

        Ok(WireRequest {
            url: Self::model_url(endpoint, model, stream),
            headers: BTreeMap::new(),
            body,
            stream,
        })
    }

    fn decode_body(&self, body: &str) -> Result<ChatResponse> {
        let v: Value = serde_json::from_str(body)?;
        if v.get("candidates").and_then(Value::as_array).map_or(true, Vec::is_empty) {
            let reason = v
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates in response");
            return Err(Error::Provider {
                provider: "google".into(),
                status: None,
                message: reason.to_string(),
            });
        }
        let mut acc = GeminiStream::default();
        acc.absorb(&v, &mut |_| {});
        Box::new(acc).finish()
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(GeminiStream::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map every tool-call id in the transcript to its function name, so a
/// `tool_result` can be sent back as a `functionResponse` with that name.
fn tool_names_by_id(messages: &[Message]) -> HashMap<&str, &str> {
    messages
        .iter()
        .flat_map(|m| m.tool_calls())
        .map(|c| (c.id, c.name))
        .collect()
}

fn parts_for(msg: &Message, names: &HashMap<&str, &str>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut trailing_images = Vec::new();

    for block in &msg.content {
        match block {
            ContentBlock::Text { text } if text.is_empty() => {}
            ContentBlock::Text { text } => parts.push(json!({"text": text})),
            ContentBlock::Image { media_type, data } => parts.push(inline_data(media_type, data)),
            ContentBlock::ToolCall { name, input, .. } => parts.push(json!({
                "functionCall": {"name": name, "args": input}
            })),
            ContentBlock::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                let name = names.get(tool_call_id.as_str()).copied().unwrap_or_else(|| {
                    tracing::warn!(
                        tool_call_id = %tool_call_id,
                        "tool result without a matching call, sending id as function name"
                    );
                    tool_call_id.as_str()
                });
                let text: Vec<&str> = content.iter().filter_map(ContentBlock::as_text).collect();
                let key = if *is_error { "error" } else { "content" };
                let mut response = serde_json::Map::new();
                response.insert(key.into(), Value::String(text.join("\n")));
                parts.push(json!({
                    "functionResponse": {"name": name, "response": response}
                }));
                for inner in content {
                    if let ContentBlock::Image { media_type, data } = inner {
                        trailing_images.push(inline_data(media_type, data));
                    }
                }
            }
        }
    }

    parts.extend(trailing_images);
    parts
}

fn inline_data(media_type: &str, data: &str) -> Value {
    json!({"inlineData": {"mimeType": media_type, "data": data}})
}

fn tool_to_gemini(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": sanitize_schema(&tool.input_schema),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_gemini_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("promptTokenCount")?.as_u64()? as u32;
    let completion = v
        .get("candidatesTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    Some(Usage {
        input_tokens: prompt,
        output_tokens: completion,
    })
}

/// Each streamed chunk is a complete `GenerateContentResponse` fragment.
/// Adjacent text parts merge into one text block; function calls arrive
/// whole.
#[derive(Default)]
struct GeminiStream {
    content: Vec<ContentBlock>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    model: String,
}

impl GeminiStream {
    fn absorb(&mut self, v: &Value, on_delta: &mut dyn FnMut(&str)) {
        if let Some(model) = v.get("modelVersion").and_then(Value::as_str) {
            self.model = model.to_string();
        }
        if let Some(usage) = v.get("usageMetadata").and_then(parse_gemini_usage) {
            self.usage = Some(usage);
        }

        let Some(candidate) = v
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
        else {
            return;
        };

        if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
            for part in parts {
                // Thought summaries are not canonical content.
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    continue;
                }
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if text.is_empty() {
                        continue;
                    }
                    on_delta(text);
                    match self.content.last_mut() {
                        Some(ContentBlock::Text { text: buf }) => buf.push_str(text),
                        _ => self.content.push(ContentBlock::text(text)),
                    }
                }
                if let Some(fc) = part.get("functionCall") {
                    self.content.push(ContentBlock::ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4()),
                        name: fc.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                        input: fc.get("args").cloned().unwrap_or_else(|| json!({})),
                    });
                }
            }
        }

        if let Some(fr) = candidate.get("finishReason").and_then(Value::as_str) {
            self.finish_reason = Some(fr.to_string());
        }
    }
}

impl StreamDecoder for GeminiStream {
    fn on_data(&mut self, data: &str, on_delta: &mut dyn FnMut(&str)) -> Result<()> {
        let v: Value = serde_json::from_str(data)
            .map_err(|e| Error::MalformedEvent(format!("google: {e}")))?;
        if let Some(message) = v.pointer("/error/message").and_then(Value::as_str) {
            return Err(Error::Provider {
                provider: "google".into(),
                status: None,
                message: message.to_string(),
            });
        }
        self.absorb(&v, on_delta);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<ChatResponse> {
        let has_tool_calls = self.content.iter().any(|b| b.as_tool_call().is_some());
        // Gemini reports STOP even when it called functions.
        let stop_reason = match self.finish_reason.as_deref() {
            Some("MAX_TOKENS") => StopReason::MaxTokens,
            _ if has_tool_calls => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };
        if let Some(reason) = self
            .finish_reason
            .as_deref()
            .filter(|r| !matches!(*r, "STOP" | "MAX_TOKENS"))
        {
            tracing::warn!(finish_reason = %reason, "gemini stopped for a non-standard reason");
        }
        Ok(ChatResponse::new(self.content, stop_reason, self.usage, self.model))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
