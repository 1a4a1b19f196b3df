//! How a [`WireRequest`] reaches the provider.
//!
//! The gateway only sees the [`Transport`] trait, so a call can go out as
//! direct HTTP ([`HttpTransport`]) or be relayed through a helper process
//! over a bidirectional RPC channel ([`ChannelTransport`]) without the
//! gateway knowing which.

use crate::traits::WireRequest;
use crate::util::from_reqwest;
use ba_domain::error::{Error, Result};
use ba_domain::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Response body as it arrives off the wire.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Status plus an unconsumed body stream.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    /// A response whose whole body is already in memory.
    pub fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status,
            body: Box::pin(futures_util::stream::once(async move { Ok(body) })),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Collect the body into a string (lossy on invalid UTF-8).
    pub async fn text(mut self) -> Result<String> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Non-success statuses are returned, not raised.
    async fn send(&self, req: WireRequest) -> Result<TransportResponse>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Direct HTTP
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Direct HTTPS via `reqwest`.
///
/// No client-level timeout: the gateway composes its own wall-clock limit
/// with task cancellation around the whole call, body included.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: WireRequest) -> Result<TransportResponse> {
        let mut builder = self.client.post(&req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if req.stream {
            builder = builder.header("accept", "text/event-stream");
        }

        tracing::debug!(url = %req.url, stream = req.stream, "sending LLM request");

        let response = builder.json(&req.body).send().await.map_err(from_reqwest)?;
        let status = response.status().as_u16();

        let body = async_stream::stream! {
            let mut response = response;
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => yield Ok(bytes.to_vec()),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        break;
                    }
                }
            }
        };

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RPC channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One request travelling to the helper, with the slot for its reply.
pub struct RpcCall {
    pub request: WireRequest,
    pub reply: oneshot::Sender<Result<TransportResponse>>,
}

/// Sends requests to whatever task owns the receiving end of the channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<RpcCall>,
}

impl ChannelTransport {
    /// Create a transport and the receiver the helper reads calls from.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<RpcCall>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, req: WireRequest) -> Result<TransportResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RpcCall { request: req, reply })
            .await
            .map_err(|_| Error::Http("RPC channel closed".into()))?;
        rx.await
            .map_err(|_| Error::Http("RPC helper dropped the call without replying".into()))?
    }
}

/// Serve calls arriving on `rx` with `inner`, each on its own task, until
/// every sender is dropped.
pub fn spawn_relay(
    mut rx: mpsc::Receiver<RpcCall>,
    inner: Arc<dyn Transport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(call) = rx.recv().await {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let result = inner.send(call.request).await;
                if call.reply.send(result).is_err() {
                    tracing::debug!("RPC caller went away before the reply");
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Fixed(u16, &'static str);

    #[async_trait::async_trait]
    impl Transport for Fixed {
        async fn send(&self, req: WireRequest) -> Result<TransportResponse> {
            assert_eq!(req.url, "https://llm.test/v1/messages");
            Ok(TransportResponse::from_bytes(self.0, self.1))
        }
    }

    fn request() -> WireRequest {
        WireRequest {
            url: "https://llm.test/v1/messages".into(),
            headers: BTreeMap::new(),
            body: json!({}),
            stream: false,
        }
    }

    #[tokio::test]
    async fn channel_relays_to_inner_transport() {
        let (transport, rx) = ChannelTransport::new(4);
        let relay = spawn_relay(rx, Arc::new(Fixed(200, "ok")));

        let resp = transport.send(request()).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.text().await.unwrap(), "ok");

        drop(transport);
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_an_http_error() {
        let (transport, rx) = ChannelTransport::new(1);
        drop(rx);
        let err = transport.send(request()).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
