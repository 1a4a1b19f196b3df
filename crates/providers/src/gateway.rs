//! The gateway: one [`LlmClient`] in front of whichever backend the config
//! points at.
//!
//! Owns everything around the adapter's pure translation: credentials,
//! the transport, cancellation composed with a wall-clock timeout, the
//! single refresh-and-retry on 401, and turning raw protocol errors into
//! readable ones.

use crate::oauth::{OAuthRefresher, TokenRefresher};
use crate::registry::ProviderRegistry;
use crate::retry::{with_refresh, RetryError, RetryPolicy};
use crate::secrets::SecretStore;
use crate::sse::decode_sse;
use crate::traits::{
    ChatRequest, ChatResponse, Credential, DeltaCallback, Endpoint, LlmClient, ProviderAdapter,
};
use crate::transport::{HttpTransport, Transport};
use crate::util::{extract_error_message, from_reqwest, has_key_source, resolve_api_key};
use ba_domain::cancel::CancelToken;
use ba_domain::config::{AuthMethod, LlmConfig};
use ba_domain::error::{Error, Result};
use ba_domain::trace::TraceEvent;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Gateway {
    adapter: Arc<dyn ProviderAdapter>,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    auth_method: AuthMethod,
    api_key: Option<String>,
    secrets: Option<Arc<dyn SecretStore>>,
    access_token_secret: String,
    refresher: Option<Arc<dyn TokenRefresher>>,
    timeout: Duration,
    stream: bool,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("provider", &self.adapter.name())
            .field("endpoint", &self.endpoint)
            .field("auth_method", &self.auth_method)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// A gateway with API-key auth (no key yet), non-streaming, and the
    /// default two-minute timeout.
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            adapter,
            endpoint,
            transport,
            auth_method: AuthMethod::ApiKey,
            api_key: None,
            secrets: None,
            access_token_secret: "oauth_access_token".into(),
            refresher: None,
            timeout: Duration::from_secs(120),
            stream: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Build from `[llm]`: select the adapter, resolve the API key, and
    /// wire OAuth refresh when the method is `oauth`.
    pub fn from_config(
        config: &LlmConfig,
        registry: &ProviderRegistry,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let adapter = registry
            .select(&config.endpoint, config.provider.as_deref())
            .ok_or_else(|| Error::Config("no provider adapters registered".into()))?;

        let auth = &config.auth;
        let api_key = match (auth.method, has_key_source(auth)) {
            (_, false) => None,
            (AuthMethod::ApiKey, true) => Some(resolve_api_key(auth)?),
            // Only a fallback for OAuth; a missing key is not fatal.
            (AuthMethod::Oauth, true) => match resolve_api_key(auth) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::debug!(error = %e, "no fallback API key for OAuth endpoint");
                    None
                }
            },
        };

        let mut gateway = Self::new(
            adapter,
            Endpoint::new(&config.endpoint, config.model.clone(), config.max_tokens),
            Arc::new(HttpTransport::new()?),
        )
        .with_timeout(Duration::from_secs(config.timeout_secs))
        .with_streaming(config.stream);
        gateway.api_key = api_key;

        if auth.method == AuthMethod::Oauth {
            let client = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(from_reqwest)?;
            let refresher = OAuthRefresher::from_config(auth, client, Arc::clone(&secrets));
            if refresher.is_none() {
                tracing::warn!("llm.auth.oauth.token_url not set; 401 responses cannot be recovered");
            }
            gateway = gateway.with_oauth(secrets, auth.oauth.access_token_secret.clone());
            if let Some(r) = refresher {
                gateway = gateway.with_refresher(Arc::new(r));
            }
        }
        Ok(gateway)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Switch to bearer auth with the access token read from `secrets`.
    pub fn with_oauth(
        mut self,
        secrets: Arc<dyn SecretStore>,
        access_token_secret: impl Into<String>,
    ) -> Self {
        self.auth_method = AuthMethod::Oauth;
        self.secrets = Some(secrets);
        self.access_token_secret = access_token_secret.into();
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.adapter.name()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    // ── credentials ─────────────────────────────────────────────────

    /// Bearer token from the secret store for OAuth, else the API key. An
    /// unreadable store counts as a missing token.
    async fn credential(&self) -> Credential {
        if self.auth_method == AuthMethod::Oauth {
            if let Some(secrets) = &self.secrets {
                match secrets.get(&self.access_token_secret).await {
                    Ok(Some(token)) if !token.is_empty() => return Credential::Bearer(token),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(
                        error = %e,
                        secret = %self.access_token_secret,
                        "could not read OAuth access token"
                    ),
                }
            }
            tracing::warn!(
                provider = self.adapter.name(),
                secret = %self.access_token_secret,
                fallback = if self.api_key.is_some() { "api_key" } else { "none" },
                "no stored OAuth access token, falling back"
            );
        }
        match &self.api_key {
            Some(key) => Credential::ApiKey(key.clone()),
            None => Credential::None,
        }
    }

    /// Race `work` against cancellation and the wall-clock timeout.
    async fn bounded<T>(
        &self,
        cancel: &CancelToken,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let secs = self.timeout.as_secs();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = tokio::time::timeout(self.timeout, work) => {
                r.unwrap_or_else(|_| Err(Error::Timeout(secs)))
            }
        }
    }

    // ── one HTTP exchange ───────────────────────────────────────────

    async fn attempt(
        &self,
        req: &ChatRequest,
        cancel: &CancelToken,
        on_delta: Option<&DeltaCallback>,
        refreshed: &Mutex<Option<String>>,
    ) -> Result<ChatResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let refreshed_token = refreshed.lock().clone();
        let credential = match refreshed_token {
            Some(token) => Credential::Bearer(token),
            None => self.credential().await,
        };

        let mut wire = self.adapter.build_request(&self.endpoint, req, self.stream)?;
        for (name, value) in self.adapter.headers(&credential) {
            wire.headers.entry(name).or_insert(value);
        }

        let exchange = async {
            let resp = self.transport.send(wire).await?;
            if !resp.is_success() {
                let status = resp.status;
                let body = resp.text().await?;
                return Err(Error::Protocol { status, body });
            }

            let mut forward = move |delta: &str| {
                if let Some(cb) = on_delta {
                    cb(delta);
                }
            };

            if self.stream {
                decode_sse(resp.body, self.adapter.stream_decoder(), &mut forward).await
            } else {
                let body = resp.text().await?;
                let response = self.adapter.decode_body(&body)?;
                let text = response.text();
                if !text.is_empty() {
                    forward(&text);
                }
                Ok(response)
            }
        };

        self.bounded(cancel, exchange).await
    }

    /// Turn a raw failure into the error the caller sees.
    fn classify(&self, error: Error, attempts: u32) -> Error {
        match error {
            Error::Protocol { status: 401, body } => {
                let message = extract_error_message(&body);
                if attempts > 1 {
                    Error::AuthenticationFailed(format!(
                        "rejected again after token refresh: {message}"
                    ))
                } else {
                    Error::AuthenticationFailed(message)
                }
            }
            Error::Protocol { status, body } => Error::Provider {
                provider: self.adapter.name().to_owned(),
                status: Some(status),
                message: extract_error_message(&body),
            },
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for Gateway {
    async fn chat(
        &self,
        req: ChatRequest,
        cancel: &CancelToken,
        on_delta: Option<&DeltaCallback>,
    ) -> Result<ChatResponse> {
        let started = Instant::now();
        let refreshed: Mutex<Option<String>> = Mutex::new(None);
        let refresher = self.refresher.as_ref();
        let provider = self.adapter.name();

        let this = self;
        let req = &req;
        let refreshed_ref = &refreshed;

        let result = with_refresh(
            self.retry,
            |e: &Error| refresher.is_some() && e.is_auth_rejection(),
            move || this.attempt(req, cancel, on_delta, refreshed_ref),
            move || async move {
                let Some(refresher) = refresher else {
                    return Err(Error::Auth("no token refresher configured".into()));
                };
                tracing::info!(provider, "401 from provider, refreshing access token");
                let outcome = this.bounded(cancel, refresher.refresh()).await;
                TraceEvent::AuthRefresh {
                    provider: provider.to_owned(),
                    success: outcome.is_ok(),
                }
                .emit();
                *refreshed_ref.lock() = Some(outcome?);
                Ok(())
            },
        )
        .await;

        let response = match result {
            Ok(r) => r,
            Err(RetryError::Refresh {
                refresh: e @ (Error::Cancelled | Error::Timeout(_)),
                ..
            }) => {
                tracing::warn!(provider, error = %e, "token refresh interrupted");
                return Err(e);
            }
            Err(RetryError::Refresh { original, refresh }) => {
                tracing::warn!(provider, original = %original, error = %refresh, "token refresh failed");
                return Err(Error::AuthenticationFailed(format!(
                    "token refresh failed: {refresh}"
                )));
            }
            Err(RetryError::Call { error, attempts }) => {
                let error = self.classify(error, attempts);
                tracing::warn!(provider, attempts, error = %error, "LLM request failed");
                return Err(error);
            }
        };

        TraceEvent::LlmRequest {
            provider: provider.to_owned(),
            model: if response.model.is_empty() {
                self.endpoint.model_for(req).to_owned()
            } else {
                response.model.clone()
            },
            streaming: self.stream,
            duration_ms: started.elapsed().as_millis() as u64,
            input_tokens: response.usage.map(|u| u.input_tokens),
            output_tokens: response.usage.map(|u| u.output_tokens),
        }
        .emit();

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::AnthropicAdapter;
    use crate::secrets::MemorySecretStore;
    use crate::traits::WireRequest;
    use crate::transport::TransportResponse;
    use ba_domain::message::Message;
    use ba_domain::stream::StopReason;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    const OK_BODY: &str = r#"{"model":"claude-test","content":[{"type":"text","text":"hi there"}],"stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":2}}"#;

    /// Replays canned responses and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<(u16, String)>>,
        seen: Mutex<Vec<WireRequest>>,
    }

    impl Scripted {
        fn new(replies: &[(u16, &str)]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|(s, b)| (*s, b.to_string())).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn sends(&self) -> usize {
            self.seen.lock().len()
        }

        fn header(&self, i: usize, name: &str) -> Option<String> {
            self.seen.lock()[i].headers.get(name).cloned()
        }
    }

    #[async_trait::async_trait]
    impl Transport for Scripted {
        async fn send(&self, req: WireRequest) -> Result<TransportResponse> {
            self.seen.lock().push(req);
            let (status, body) = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or((500, "script exhausted".into()));
            Ok(TransportResponse::from_bytes(status, body))
        }
    }

    /// Never answers.
    struct Hang;

    #[async_trait::async_trait]
    impl Transport for Hang {
        async fn send(&self, _req: WireRequest) -> Result<TransportResponse> {
            std::future::pending().await
        }
    }

    struct FixedRefresher {
        token: Option<&'static str>,
        calls: AtomicU32,
    }

    impl FixedRefresher {
        fn ok(token: &'static str) -> Arc<Self> {
            Arc::new(Self {
                token: Some(token),
                calls: AtomicU32::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                token: None,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token
                .map(str::to_owned)
                .ok_or_else(|| Error::Auth("invalid_grant".into()))
        }
    }

    /// A token endpoint that never answers.
    struct StuckRefresher;

    #[async_trait::async_trait]
    impl TokenRefresher for StuckRefresher {
        async fn refresh(&self) -> Result<String> {
            std::future::pending().await
        }
    }

    /// A keychain with no backing service.
    struct UnavailableStore;

    #[async_trait::async_trait]
    impl SecretStore for UnavailableStore {
        async fn get(&self, _name: &str) -> Result<Option<String>> {
            Err(Error::Auth("keyring get_password failed: no daemon".into()))
        }
        async fn set(&self, _name: &str, _value: &str) -> Result<()> {
            Err(Error::Auth("keyring unavailable".into()))
        }
        async fn remove(&self, _name: &str) -> Result<()> {
            Err(Error::Auth("keyring unavailable".into()))
        }
    }

    fn gateway(transport: Arc<dyn Transport>) -> Gateway {
        Gateway::new(
            Arc::new(AnthropicAdapter),
            Endpoint::new("https://api.anthropic.com", "claude-test", 256),
            transport,
        )
    }

    fn oauth_gateway(transport: Arc<dyn Transport>) -> Gateway {
        let secrets = Arc::new(MemorySecretStore::new().with("oauth_access_token", "stale"));
        gateway(transport).with_oauth(secrets, "oauth_access_token")
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("hello")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn api_key_request_succeeds() {
        let transport = Scripted::new(&[(200, OK_BODY)]);
        let gw = gateway(transport.clone()).with_api_key("sk-ant-test");

        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let cb: &DeltaCallback = &move |d: &str| sink.lock().push_str(d);

        let resp = gw
            .chat(request(), &CancelToken::new(), Some(cb))
            .await
            .unwrap();
        assert_eq!(resp.text(), "hi there");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(*seen.lock(), "hi there");
        assert_eq!(transport.header(0, "x-api-key").as_deref(), Some("sk-ant-test"));
    }

    #[tokio::test]
    async fn unauthorized_then_refresh_then_success() {
        let transport = Scripted::new(&[(401, r#"{"error":{"message":"expired"}}"#), (200, OK_BODY)]);
        let refresher = FixedRefresher::ok("fresh");
        let gw = oauth_gateway(transport.clone()).with_refresher(refresher.clone());

        let resp = gw.chat(request(), &CancelToken::new(), None).await.unwrap();
        assert_eq!(resp.text(), "hi there");
        assert_eq!(transport.sends(), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.header(0, "authorization").as_deref(), Some("Bearer stale"));
        assert_eq!(transport.header(1, "authorization").as_deref(), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn failed_refresh_is_one_auth_error_and_no_retry() {
        let transport = Scripted::new(&[(401, "{}"), (200, OK_BODY)]);
        let refresher = FixedRefresher::failing();
        let gw = oauth_gateway(transport.clone()).with_refresher(refresher.clone());

        let err = gw.chat(request(), &CancelToken::new(), None).await.unwrap_err();
        match err {
            Error::AuthenticationFailed(msg) => {
                assert!(msg.contains("token refresh failed"), "{msg}");
                assert!(msg.contains("invalid_grant"), "{msg}");
            }
            other => panic!("expected AuthenticationFailed, got {other:?}"),
        }
        assert_eq!(transport.sends(), 1);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_unauthorized_is_not_retried_again() {
        let transport = Scripted::new(&[(401, "{}"), (401, r#"{"error":{"message":"nope"}}"#)]);
        let refresher = FixedRefresher::ok("fresh");
        let gw = oauth_gateway(transport.clone()).with_refresher(refresher.clone());

        let err = gw.chat(request(), &CancelToken::new(), None).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(ref m) if m.contains("nope")));
        assert_eq!(transport.sends(), 2);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn api_key_unauthorized_is_not_retried() {
        let transport = Scripted::new(&[(401, r#"{"error":{"message":"invalid x-api-key"}}"#)]);
        let gw = gateway(transport.clone()).with_api_key("bad");

        let err = gw.chat(request(), &CancelToken::new(), None).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(ref m) if m == "invalid x-api-key"));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn server_error_message_is_extracted() {
        let transport = Scripted::new(&[(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )]);
        let gw = gateway(transport).with_api_key("k");

        let err = gw.chat(request(), &CancelToken::new(), None).await.unwrap_err();
        match err {
            Error::Provider {
                provider,
                status,
                message,
            } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(status, Some(529));
                assert_eq!(message, "Overloaded");
            }
            other => panic!("expected Provider, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_oauth_token_falls_back_to_api_key() {
        let transport = Scripted::new(&[(200, OK_BODY)]);
        let gw = gateway(transport.clone())
            .with_api_key("sk-fallback")
            .with_oauth(Arc::new(MemorySecretStore::new()), "oauth_access_token");

        gw.chat(request(), &CancelToken::new(), None).await.unwrap();
        assert_eq!(transport.header(0, "x-api-key").as_deref(), Some("sk-fallback"));
        assert_eq!(transport.header(0, "authorization"), None);
    }

    #[tokio::test]
    async fn unreadable_secret_store_falls_back_to_api_key() {
        let transport = Scripted::new(&[(200, OK_BODY)]);
        let gw = gateway(transport.clone())
            .with_api_key("sk-fallback")
            .with_oauth(Arc::new(UnavailableStore), "oauth_access_token");

        let resp = gw.chat(request(), &CancelToken::new(), None).await.unwrap();
        assert_eq!(resp.text(), "hi there");
        assert_eq!(transport.sends(), 1);
        assert_eq!(transport.header(0, "x-api-key").as_deref(), Some("sk-fallback"));
    }

    #[tokio::test]
    async fn cancellation_aborts_stuck_token_refresh() {
        let transport = Scripted::new(&[(401, "{}"), (401, "{}")]);
        let gw = oauth_gateway(transport.clone())
            .with_refresher(Arc::new(StuckRefresher))
            .with_timeout(Duration::from_secs(60));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            gw.chat(request(), &cancel, None),
        )
        .await
        .expect("chat returned after cancel");
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn stuck_token_refresh_times_out() {
        let transport = Scripted::new(&[(401, "{}"), (401, "{}")]);
        let gw = oauth_gateway(transport.clone())
            .with_refresher(Arc::new(StuckRefresher))
            .with_timeout(Duration::from_millis(50));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            gw.chat(request(), &CancelToken::new(), None),
        )
        .await
        .expect("chat returned after timeout");
        assert!(matches!(result, Err(Error::Timeout(0))));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let gw = gateway(Arc::new(Hang)).with_api_key("k");
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = gw.chat(request(), &cancel, None).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn timeout_reports_seconds() {
        let gw = gateway(Arc::new(Hang))
            .with_api_key("k")
            .with_timeout(Duration::from_millis(30));

        let err = gw.chat(request(), &CancelToken::new(), None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(0)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn streaming_forwards_deltas_in_order() {
        let sse = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-test\",\"usage\":{\"input_tokens\":4,\"output_tokens\":0}}}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "data: {not json\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let transport = Scripted::new(&[(200, sse)]);
        let gw = gateway(transport.clone()).with_api_key("k").with_streaming(true);

        let deltas = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = deltas.clone();
        let cb: &DeltaCallback = &move |d: &str| sink.lock().push(d.to_owned());

        let resp = gw
            .chat(request(), &CancelToken::new(), Some(cb))
            .await
            .unwrap();
        assert_eq!(resp.text(), "Hello");
        assert_eq!(*deltas.lock(), vec!["Hel", "lo"]);
        assert!(transport.seen.lock()[0].stream);
    }
}
