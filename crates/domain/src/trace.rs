use serde::Serialize;

/// Structured trace events emitted across all browseragent crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ProviderSelected {
        provider: String,
        endpoint: String,
        /// False when no adapter matched and the default was used.
        matched: bool,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
    },
    AuthRefresh {
        provider: String,
        success: bool,
    },
    Compaction {
        mode: String,
        messages_before: usize,
        messages_after: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    ToolDispatched {
        tool: String,
        duration_ms: u64,
        is_error: bool,
    },
    TaskFinished {
        outcome: String,
        steps: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ba_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let ev = TraceEvent::AuthRefresh {
            provider: "anthropic".into(),
            success: false,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "AuthRefresh");
        assert_eq!(v["success"], false);
    }
}
