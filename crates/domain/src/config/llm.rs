use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single LLM endpoint a task talks to.
///
/// Reloaded at the start of every task and handed to the gateway as an
/// immutable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the provider API (e.g. `https://api.anthropic.com`).
    #[serde(default = "d_endpoint")]
    pub endpoint: String,
    /// Explicit adapter name. When unset the adapter is picked by matching
    /// `endpoint`.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_4096")]
    pub max_tokens: u32,
    /// Wall-clock cap for one LLM call, composed with task cancellation.
    #[serde(default = "d_120")]
    pub timeout_secs: u64,
    /// Request server-sent events and surface text deltas as they arrive.
    #[serde(default = "d_true")]
    pub stream: bool,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: d_endpoint(),
            provider: None,
            model: d_model(),
            max_tokens: 4096,
            timeout_secs: 120,
            stream: true,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name (e.g., "browseragent").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g., "anthropic-api-key").
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Static API key sent in the provider's key header.
    #[default]
    ApiKey,
    /// Bearer token read from the secret store, refreshed on 401.
    Oauth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Token endpoint used for the `refresh_token` grant.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Secret-store name holding the current access token.
    #[serde(default = "d_access_secret")]
    pub access_token_secret: String,
    /// Secret-store name holding the refresh token.
    #[serde(default = "d_refresh_secret")]
    pub refresh_token_secret: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: None,
            access_token_secret: d_access_secret(),
            refresh_token_secret: d_refresh_secret(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_endpoint() -> String {
    "https://api.anthropic.com".into()
}
fn d_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_4096() -> u32 {
    4096
}
fn d_120() -> u64 {
    120
}
fn d_true() -> bool {
    true
}
fn d_access_secret() -> String {
    "oauth_access_token".into()
}
fn d_refresh_secret() -> String {
    "oauth_refresh_token".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
