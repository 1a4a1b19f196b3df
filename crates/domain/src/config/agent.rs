use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Step budget per task. `0` means unbounded.
    #[serde(default = "d_50")]
    pub max_steps: u32,
    /// System prompt sent with every call.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Restricts tools to specific sites. Tools not listed here are offered
    /// on every page.
    #[serde(default)]
    pub tool_sites: Vec<ToolSiteRule>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            system_prompt: None,
            tool_sites: Vec::new(),
        }
    }
}

/// `tool` is only offered when the page host matches one of `hosts`
/// (exact match or subdomain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSiteRule {
    pub tool: String,
    pub hosts: Vec<String>,
}

impl AgentConfig {
    /// The step budget, `None` when unbounded.
    pub fn step_budget(&self) -> Option<u32> {
        (self.max_steps > 0).then_some(self.max_steps)
    }
}

fn d_50() -> u32 {
    50
}
