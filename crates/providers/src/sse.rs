//! Shared SSE streaming infrastructure for all provider adapters.
//!
//! Every provider follows the same pattern: receive a byte stream, buffer
//! chunks, split on `\n\n`, extract `data:` payloads, and feed each payload
//! to a provider-specific [`StreamDecoder`].
//!
//! This module holds that shared logic:
//! - [`drain_data_lines`] -- pull complete `data:` payloads from an SSE buffer
//! - [`decode_sse`] -- drive a decoder over a whole response body

use crate::traits::{ChatResponse, StreamDecoder};
use crate::transport::ByteStream;
use ba_domain::error::{Error, Result};
use futures_util::StreamExt;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`.  Each event block may contain
/// `event:`, `data:`, `id:`, or `retry:` lines.  We only care about
/// `data:` lines.
///
/// The buffer is drained in-place: consumed bytes are removed and any
/// trailing partial event remains for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Move the longest valid UTF-8 prefix of `pending` into a `String`.
///
/// A multi-byte character split across two chunks stays in `pending` until
/// the rest of it arrives. Genuinely invalid bytes are replaced.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let out = s.to_string();
            pending.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}

fn feed(
    decoder: &mut dyn StreamDecoder,
    data: &str,
    on_delta: &mut dyn FnMut(&str),
) -> Result<()> {
    match decoder.on_data(data, on_delta) {
        Err(Error::MalformedEvent(reason)) => {
            tracing::warn!(reason = %reason, "skipping malformed SSE event");
            Ok(())
        }
        other => other,
    }
}

/// Drive `decoder` over an SSE response body and return the finished
/// response.
///
/// The stream automatically:
/// 1. Buffers incoming chunks (UTF-8 and `\r\n` safe) and drains complete events
/// 2. Skips malformed events with a warning instead of aborting
/// 3. Flushes the remaining buffer when the body closes
pub(crate) async fn decode_sse(
    mut body: ByteStream,
    mut decoder: Box<dyn StreamDecoder>,
    on_delta: &mut (dyn FnMut(&str) + Send),
) -> Result<ChatResponse> {
    let mut pending: Vec<u8> = Vec::new();
    let mut buffer = String::new();

    while let Some(chunk) = body.next().await {
        pending.extend_from_slice(&chunk?);
        buffer.push_str(&take_utf8(&mut pending));
        if buffer.contains('\r') {
            buffer = buffer.replace("\r\n", "\n");
        }

        for data in drain_data_lines(&mut buffer) {
            feed(decoder.as_mut(), &data, &mut *on_delta)?;
        }
    }

    // Stream ended -- flush any remaining partial event.
    if !pending.is_empty() {
        buffer.push_str(&String::from_utf8_lossy(&pending));
    }
    if !buffer.trim().is_empty() {
        buffer.push_str("\n\n");
        for data in drain_data_lines(&mut buffer) {
            feed(decoder.as_mut(), &data, &mut *on_delta)?;
        }
    }

    decoder.finish()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
