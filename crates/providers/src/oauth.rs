//! OAuth 2.0 access-token refresh (`refresh_token` grant, RFC 6749 §6).
//!
//! The access and refresh tokens live in a [`SecretStore`]. A successful
//! refresh writes the new access token back, along with the refresh token
//! when the server rotates it.

use crate::secrets::SecretStore;
use ba_domain::config::AuthConfig;
use ba_domain::error::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;

/// Produces a fresh bearer token after the current one was rejected.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain and persist a new access token, returning it.
    async fn refresh(&self) -> Result<String>;
}

/// Response from the token endpoint.
///
/// `Debug` is manually implemented to redact secrets.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Error body returned by the OAuth server.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct OAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    secrets: Arc<dyn SecretStore>,
    access_secret: String,
    refresh_secret: String,
}

impl OAuthRefresher {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: None,
            secrets,
            access_secret: "oauth_access_token".into(),
            refresh_secret: "oauth_refresh_token".into(),
        }
    }

    /// Build from `[llm.auth]`. `None` when no token URL is configured, in
    /// which case a 401 cannot be recovered from.
    pub fn from_config(
        auth: &AuthConfig,
        client: reqwest::Client,
        secrets: Arc<dyn SecretStore>,
    ) -> Option<Self> {
        let token_url = auth.oauth.token_url.as_deref()?;
        Some(Self {
            client,
            token_url: token_url.to_owned(),
            client_id: auth.oauth.client_id.clone(),
            secrets,
            access_secret: auth.oauth.access_token_secret.clone(),
            refresh_secret: auth.oauth.refresh_token_secret.clone(),
        })
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    async fn request(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(id) = &self.client_id {
            form.push(("client_id", id.as_str()));
        }

        let resp = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token refresh request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Auth(format!("reading refresh response: {e}")))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<OAuthErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {desc}", err.error),
                    None => err.error,
                },
                Err(_) => crate::util::extract_error_message(&body),
            };
            return Err(Error::Auth(format!(
                "token refresh returned HTTP {}: {detail}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Auth(format!("parsing refresh response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(Error::Auth("refresh response carried an empty access token".into()));
        }
        Ok(token)
    }
}

#[async_trait::async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self) -> Result<String> {
        let refresh_token = self
            .secrets
            .get(&self.refresh_secret)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Auth(format!(
                    "no refresh token stored under '{}'",
                    self.refresh_secret
                ))
            })?;

        let token = self.request(&refresh_token).await?;

        self.secrets
            .set(&self.access_secret, &token.access_token)
            .await?;
        if let Some(rotated) = token.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            if rotated != refresh_token {
                self.secrets.set(&self.refresh_secret, rotated).await?;
            }
        }

        tracing::info!(
            token_url = %self.token_url,
            expires_in = ?token.expires_in,
            "OAuth access token refreshed"
        );
        Ok(token.access_token)
    }
}
