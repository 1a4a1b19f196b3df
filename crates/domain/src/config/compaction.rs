use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow during long tasks.
///
/// The token constants are heuristics calibrated against the current
/// backends; recalibrate them before adding a backend with a smaller window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable compaction before each LLM call.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Estimated token count at which compaction fires.
    #[serde(default = "d_170000")]
    pub threshold_tokens: usize,
    /// Fixed cost covering the system prompt and tool schemas.
    #[serde(default = "d_8000")]
    pub base_overhead_tokens: usize,
    /// Characters per token for text estimation.
    #[serde(default = "d_4")]
    pub chars_per_token: usize,
    /// Flat cost charged per image block.
    #[serde(default = "d_1600")]
    pub image_tokens: usize,
    /// Most recent image-bearing user messages kept verbatim.
    #[serde(default = "d_3")]
    pub recent_image_messages: usize,
    /// Output budget for the summarization call.
    #[serde(default = "d_4096")]
    pub summary_max_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_tokens: 170_000,
            base_overhead_tokens: 8_000,
            chars_per_token: 4,
            image_tokens: 1_600,
            recent_image_messages: 3,
            summary_max_tokens: 4096,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_170000() -> usize {
    170_000
}
fn d_8000() -> usize {
    8_000
}
fn d_4() -> usize {
    4
}
fn d_1600() -> usize {
    1_600
}
fn d_3() -> usize {
    3
}
fn d_4096() -> u32 {
    4096
}
