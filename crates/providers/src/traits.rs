use ba_domain::cancel::CancelToken;
use ba_domain::error::Result;
use ba_domain::message::{ContentBlock, Message, ToolCallRef, ToolDefinition};
use ba_domain::stream::{StopReason, Usage};
use serde_json::Value;
use std::collections::BTreeMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// System prompt, sent in whatever slot the provider reserves for it.
    pub system: Option<String>,
    /// Tool definitions the model may invoke. Empty means a non-tool call.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens in the response. `None` uses the endpoint default.
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` uses the endpoint default.
    pub model: Option<String>,
}

/// A provider-agnostic chat response, already normalized to canonical blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Never empty: a response without content carries one empty text block.
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
}

impl ChatResponse {
    /// Build a response, synthesizing an empty text block when `content` is
    /// empty so downstream code never sees an empty message.
    pub fn new(
        mut content: Vec<ContentBlock>,
        stop_reason: StopReason,
        usage: Option<Usage>,
        model: impl Into<String>,
    ) -> Self {
        if content.is_empty() {
            content.push(ContentBlock::text(""));
        }
        Self {
            content,
            stop_reason,
            usage,
            model: model.into(),
        }
    }

    /// Concatenated text of every text block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = ToolCallRef<'_>> {
        self.content.iter().filter_map(ContentBlock::as_tool_call)
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }
}

/// The endpoint a request is addressed to.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Endpoint {
    pub fn new(base_url: &str, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens,
        }
    }

    pub(crate) fn model_for<'a>(&'a self, req: &'a ChatRequest) -> &'a str {
        req.model.as_deref().unwrap_or(&self.model)
    }

    pub(crate) fn max_tokens_for(&self, req: &ChatRequest) -> u32 {
        req.max_tokens.unwrap_or(self.max_tokens)
    }
}

/// A fully built HTTP request, ready for a [`crate::transport::Transport`].
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    /// The response is a server-sent event stream.
    pub stream: bool,
}

/// Credential the gateway resolved for this call.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Static API key, sent in the provider's key header.
    ApiKey(String),
    /// OAuth access token, sent as `Authorization: Bearer`.
    Bearer(String),
    /// Unauthenticated (local servers).
    None,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Credential::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Credential::None => f.write_str("None"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every provider adapter implements.
///
/// Adapters are pure translators between canonical types and one backend's
/// wire format. They never perform I/O and never decide retry policy: a
/// non-success reply is surfaced by the gateway as `Error::Protocol` and
/// classified there.
pub trait ProviderAdapter: Send + Sync {
    /// Stable adapter name, used for explicit selection.
    fn name(&self) -> &'static str;

    /// Whether this adapter is the natural choice for `endpoint_url`.
    fn matches(&self, endpoint_url: &str) -> bool;

    /// Auth, version and beta headers for `credential`.
    fn headers(&self, credential: &Credential) -> BTreeMap<String, String>;

    /// Convert a canonical request into the provider's URL and JSON body.
    fn build_request(
        &self,
        endpoint: &Endpoint,
        req: &ChatRequest,
        stream: bool,
    ) -> Result<WireRequest>;

    /// Normalize a complete (non-streaming) response body.
    fn decode_body(&self, body: &str) -> Result<ChatResponse>;

    /// A fresh decoder for one streamed response.
    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;
}

/// Incremental decoder for one server-sent event stream.
///
/// Fed one `data:` payload at a time, in arrival order.
pub trait StreamDecoder: Send {
    /// Consume one payload. Text deltas are forwarded to `on_delta` as they
    /// arrive.
    ///
    /// Returning `Error::MalformedEvent` skips the payload; any other error
    /// aborts the stream.
    fn on_data(&mut self, data: &str, on_delta: &mut dyn FnMut(&str)) -> Result<()>;

    /// Finalize the response once the stream has ended.
    fn finish(self: Box<Self>) -> Result<ChatResponse>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Callback receiving streamed text deltas, strictly in arrival order.
pub type DeltaCallback = dyn Fn(&str) + Send + Sync;

/// Anything that can answer a [`ChatRequest`]. Implemented by the
/// [`crate::gateway::Gateway`], and by scripted doubles in tests.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        req: ChatRequest,
        cancel: &CancelToken,
        on_delta: Option<&DeltaCallback>,
    ) -> Result<ChatResponse>;
}

/// Text sent as the opening user turn when a transcript starts with an
/// assistant message and the backend insists on a user turn first.
pub(crate) const LEADING_USER_TURN: &str = "Continue.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_gets_one_empty_text_block() {
        let resp = ChatResponse::new(Vec::new(), StopReason::EndTurn, None, "m");
        assert_eq!(resp.content, vec![ContentBlock::text("")]);
        assert_eq!(resp.text(), "");
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let ep = Endpoint::new("https://api.anthropic.com/", "m", 10);
        assert_eq!(ep.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let s = format!("{:?}", Credential::ApiKey("sk-secret".into()));
        assert!(!s.contains("sk-secret"));
    }
}
