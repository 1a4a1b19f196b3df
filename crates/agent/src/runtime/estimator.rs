//! Cheap token estimate used to decide when to compact.
//!
//! Characters over a fixed ratio for text, a flat cost per image. Real
//! tokenization is backend-specific, so every constant comes from
//! `[compaction]` and is meant to be tuned rather than trusted.

use ba_domain::config::CompactionConfig;
use ba_domain::message::{ContentBlock, Message};

#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    base_overhead: usize,
    chars_per_token: usize,
    image_tokens: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::from_config(&CompactionConfig::default())
    }
}

impl TokenEstimator {
    pub fn from_config(config: &CompactionConfig) -> Self {
        Self {
            base_overhead: config.base_overhead_tokens,
            chars_per_token: config.chars_per_token.max(1),
            image_tokens: config.image_tokens,
        }
    }

    pub fn estimate_text(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }

    pub fn estimate_block(&self, block: &ContentBlock) -> usize {
        match block {
            ContentBlock::Text { text } => self.estimate_text(text),
            ContentBlock::Image { .. } => self.image_tokens,
            ContentBlock::ToolCall { name, input, .. } => {
                self.estimate_text(name) + self.estimate_text(&input.to_string())
            }
            ContentBlock::ToolResult { content, .. } => {
                content.iter().map(|b| self.estimate_block(b)).sum()
            }
        }
    }

    pub fn estimate_message(&self, message: &Message) -> usize {
        message.content.iter().map(|b| self.estimate_block(b)).sum()
    }

    /// Fixed overhead (system prompt, tool schemas) plus every message.
    pub fn estimate(&self, conversation: &[Message]) -> usize {
        self.base_overhead
            + conversation
                .iter()
                .map(|m| self.estimate_message(m))
                .sum::<usize>()
    }
}
