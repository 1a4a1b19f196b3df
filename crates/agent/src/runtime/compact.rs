//! Conversation compaction: replace a long transcript with a generated
//! summary so the next call fits the context window.
//!
//! The summary comes from a nested non-tool call through the same
//! [`LlmClient`]. If that call fails for any reason the transcript is
//! truncated instead ("emergency" compaction), which needs no network and
//! cannot fail.
//!
//! Only whole messages survive: the most recent image-bearing user
//! messages. Their `tool_result` blocks are flattened into plain text and
//! images because the matching `tool_call` is always discarded.

use std::fmt::Write as _;

use ba_domain::cancel::CancelToken;
use ba_domain::config::CompactionConfig;
use ba_domain::error::{Error, Result};
use ba_domain::message::{ContentBlock, Message, Role};
use ba_domain::trace::TraceEvent;
use ba_providers::util::truncate_chars;
use ba_providers::{ChatRequest, LlmClient};

use super::estimator::TokenEstimator;

/// Stand-in for an image dropped from the summarization copy.
const IMAGE_PLACEHOLDER: &str = "[image omitted]";

/// Longest excerpt of the opening request carried into a compacted transcript.
const MAX_FIRST_MESSAGE_CHARS: usize = 4_000;

/// Tool results longer than this are cut down in the summarization copy.
const MAX_TOOL_RESULT_CHARS: usize = 2_000;

const TRUNCATION_MARKER: &str = "... (truncated)";

const SUMMARY_INSTRUCTION: &str = "\
The conversation above is about to be compacted because it no longer fits the context window. \
Write a summary that will replace everything above, so that you can continue the task from it alone.

Include, in this order:
1. USER INSTRUCTIONS: every instruction, request and constraint the user gave, quoted verbatim. \
Do not paraphrase them.
2. TASK PATTERN: if the work is repetitive (the same steps applied to many items, pages or records), \
describe the exact steps of one iteration, which items are finished and which remain.
3. PROGRESS: what has been done so far, including pages visited, values found, forms filled and \
anything you created or changed.
4. FACTS: URLs, identifiers, names, numbers and other details you will need again.
5. PROBLEMS: errors you hit and approaches that did not work, so they are not repeated.
6. RESUME POINT: the exact next action to take, stated so it can be executed immediately.

Write only the summary. Do not call any tools.";

const ACKNOWLEDGEMENT: &str = "\
Understood. The earlier conversation has been compacted into the summary below, \
and I will continue the task from its resume point.";

const EMERGENCY_NOTE: &str = "\
The earlier conversation was removed because it no longer fit the context window \
and could not be summarized. I will continue the task from the most recent context.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionMode {
    Summary,
    Emergency,
}

impl CompactionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CompactionMode::Summary => "summary",
            CompactionMode::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub mode: CompactionMode,
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compactor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Compactor {
    config: CompactionConfig,
    estimator: TokenEstimator,
}

impl Compactor {
    pub fn new(config: CompactionConfig) -> Self {
        let estimator = TokenEstimator::from_config(&config);
        Self { config, estimator }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Whether `conversation` is over the threshold and long enough to
    /// shrink.
    pub fn needs_compaction(&self, conversation: &[Message]) -> bool {
        self.config.enabled
            && conversation.len() >= 3
            && self.estimator.estimate(conversation) >= self.config.threshold_tokens
    }

    /// Compact `conversation` in place when it is over the threshold.
    ///
    /// Returns `None` when nothing was done. Never fails: a failed
    /// summary degrades to [`Compactor::emergency_compact`]. A summary
    /// call aborted by `cancel` leaves the transcript untouched so the
    /// caller can stop cleanly.
    pub async fn compact_if_needed(
        &self,
        client: &dyn LlmClient,
        conversation: &mut Vec<Message>,
        cancel: &CancelToken,
    ) -> Option<CompactionReport> {
        if !self.needs_compaction(conversation) {
            return None;
        }

        let tokens_before = self.estimator.estimate(conversation);
        let messages_before = conversation.len();
        tracing::info!(
            messages = messages_before,
            tokens = tokens_before,
            threshold = self.config.threshold_tokens,
            "conversation over token threshold, compacting"
        );

        let (mode, compacted) = match self.summarize(client, conversation, cancel).await {
            Ok(summary) => (
                CompactionMode::Summary,
                self.rebuild_with_summary(conversation, &summary),
            ),
            Err(Error::Cancelled) => {
                tracing::info!("compaction cancelled, leaving transcript as is");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary compaction failed, truncating instead");
                (CompactionMode::Emergency, self.emergency_compact(conversation))
            }
        };

        let report = CompactionReport {
            mode,
            messages_before,
            messages_after: compacted.len(),
            tokens_before,
            tokens_after: self.estimator.estimate(&compacted),
        };
        *conversation = compacted;

        TraceEvent::Compaction {
            mode: mode.as_str().to_owned(),
            messages_before: report.messages_before,
            messages_after: report.messages_after,
            tokens_before: report.tokens_before,
            tokens_after: report.tokens_after,
        }
        .emit();

        Some(report)
    }

    /// Summarization-free fallback: one assistant note plus the preserved
    /// recent image-bearing messages. Pure; performs no I/O.
    pub fn emergency_compact(&self, conversation: &[Message]) -> Vec<Message> {
        let preserved = self.preserved_indices(conversation);

        let mut note = EMERGENCY_NOTE.to_owned();
        if let Some(first) = first_request(conversation, &preserved) {
            let _ = write!(note, "\n\nThe original request was:\n{first}");
        }

        let mut out = Vec::with_capacity(preserved.len() + 1);
        out.push(Message::assistant(note));
        out.extend(preserved.iter().map(|&i| flatten_tool_results(&conversation[i])));
        out
    }

    // ── internals ───────────────────────────────────────────────────

    /// Indices of the most recent user messages carrying an image, oldest
    /// first. Capped so the compacted transcript (two synthetic messages
    /// plus these) is always shorter than the input.
    fn preserved_indices(&self, conversation: &[Message]) -> Vec<usize> {
        let cap = self
            .config
            .recent_image_messages
            .min(conversation.len().saturating_sub(3));
        let mut picked: Vec<usize> = conversation
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.role == Role::User && m.has_image())
            .map(|(i, _)| i)
            .take(cap)
            .collect();
        picked.reverse();
        picked
    }

    async fn summarize(
        &self,
        client: &dyn LlmClient,
        conversation: &[Message],
        cancel: &CancelToken,
    ) -> Result<String> {
        let mut messages = text_only_copy(conversation);
        match messages.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push(ContentBlock::text(SUMMARY_INSTRUCTION));
            }
            _ => messages.push(Message::user(SUMMARY_INSTRUCTION)),
        }

        let req = ChatRequest {
            messages,
            max_tokens: Some(self.config.summary_max_tokens),
            ..Default::default()
        };

        let resp = client.chat(req, cancel, None).await?;
        let summary = resp.text().trim().to_owned();
        if summary.is_empty() {
            return Err(Error::Compaction("summary response was empty".into()));
        }
        Ok(summary)
    }

    fn rebuild_with_summary(&self, conversation: &[Message], summary: &str) -> Vec<Message> {
        let preserved = self.preserved_indices(conversation);

        let mut body = String::new();
        if let Some(first) = first_request(conversation, &preserved) {
            let _ = write!(body, "My original request was:\n{first}\n\n");
        }
        let _ = write!(body, "Summary of the conversation so far:\n{summary}");

        let mut out = Vec::with_capacity(preserved.len() + 2);
        out.push(Message::assistant(ACKNOWLEDGEMENT));
        out.push(Message::user(body));
        out.extend(preserved.iter().map(|&i| flatten_tool_results(&conversation[i])));
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript rewriting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text of the opening user message, unless it is preserved verbatim anyway.
fn first_request(conversation: &[Message], preserved: &[usize]) -> Option<String> {
    let (idx, first) = conversation
        .iter()
        .enumerate()
        .find(|(_, m)| m.role == Role::User)?;
    if preserved.contains(&idx) {
        return None;
    }
    let text = first.extract_all_text();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(truncate_chars(text, MAX_FIRST_MESSAGE_CHARS, TRUNCATION_MARKER))
}

/// Copy of the transcript with images replaced by placeholders and tool
/// blocks rendered as text, so the summary call carries no tool schema
/// and stays small. Adjacent messages with the same role are merged.
fn text_only_copy(conversation: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(conversation.len());
    for msg in conversation {
        let blocks: Vec<ContentBlock> = msg.content.iter().map(block_as_text).collect();
        match out.last_mut() {
            Some(prev) if prev.role == msg.role => prev.content.extend(blocks),
            _ => out.push(Message {
                role: msg.role,
                content: blocks,
            }),
        }
    }
    out
}

fn block_as_text(block: &ContentBlock) -> ContentBlock {
    match block {
        ContentBlock::Text { text } => ContentBlock::text(text.clone()),
        ContentBlock::Image { .. } => ContentBlock::text(IMAGE_PLACEHOLDER),
        ContentBlock::ToolCall { name, input, .. } => {
            ContentBlock::text(format!("[Called tool {name} with input {input}]"))
        }
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            let status = if *is_error { "error" } else { "ok" };
            let mut parts = Vec::with_capacity(content.len());
            for inner in content {
                match inner {
                    ContentBlock::Text { text } => {
                        parts.push(truncate_chars(text, MAX_TOOL_RESULT_CHARS, TRUNCATION_MARKER))
                    }
                    ContentBlock::Image { .. } => parts.push(IMAGE_PLACEHOLDER.to_owned()),
                    _ => {}
                }
            }
            ContentBlock::text(format!("[Tool result ({status}): {}]", parts.join(" ")))
        }
    }
}

/// Keep a preserved message's images but turn its tool results into plain
/// blocks, since the originating tool calls are gone.
fn flatten_tool_results(message: &Message) -> Message {
    let mut content = Vec::with_capacity(message.content.len());
    for block in &message.content {
        match block {
            ContentBlock::ToolResult {
                content: inner,
                is_error,
                ..
            } => {
                let label = if *is_error {
                    "[Earlier tool result (error)]"
                } else {
                    "[Earlier tool result]"
                };
                content.push(ContentBlock::text(label));
                content.extend(
                    inner
                        .iter()
                        .filter(|b| matches!(b, ContentBlock::Text { .. } | ContentBlock::Image { .. }))
                        .cloned(),
                );
            }
            ContentBlock::ToolCall { name, input, .. } => {
                content.push(ContentBlock::text(format!("[Called tool {name} with input {input}]")));
            }
            other => content.push(other.clone()),
        }
    }
    Message {
        role: message.role,
        content,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
