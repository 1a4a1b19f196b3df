mod agent;
mod compaction;
mod llm;
mod logging;

pub use agent::*;
pub use compaction::*;
pub use llm::*;
pub use logging::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.llm.endpoint.trim().is_empty() {
            errors.push(ConfigError::error("llm.endpoint", "endpoint must not be empty"));
        } else if !self.llm.endpoint.starts_with("http://")
            && !self.llm.endpoint.starts_with("https://")
        {
            errors.push(ConfigError::error(
                "llm.endpoint",
                "endpoint must be an http:// or https:// URL",
            ));
        }

        if self.llm.model.trim().is_empty() {
            errors.push(ConfigError::error("llm.model", "model must not be empty"));
        }

        if self.llm.max_tokens == 0 {
            errors.push(ConfigError::error(
                "llm.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }

        if self.llm.timeout_secs == 0 {
            errors.push(ConfigError::error(
                "llm.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }

        match self.llm.auth.method {
            AuthMethod::ApiKey => {
                let auth = &self.llm.auth;
                if auth.key.is_none() && auth.env.is_none() && auth.account.is_none() {
                    errors.push(ConfigError::warning(
                        "llm.auth",
                        "no key, env or keychain account configured; requests will be unauthenticated",
                    ));
                }
            }
            AuthMethod::Oauth => {
                let oauth = &self.llm.auth.oauth;
                if oauth.token_url.is_none() {
                    errors.push(ConfigError::warning(
                        "llm.auth.oauth.token_url",
                        "no token_url configured; expired tokens cannot be refreshed",
                    ));
                }
                if oauth.access_token_secret.trim().is_empty() {
                    errors.push(ConfigError::error(
                        "llm.auth.oauth.access_token_secret",
                        "secret name must not be empty",
                    ));
                }
            }
        }

        if self.compaction.chars_per_token == 0 {
            errors.push(ConfigError::error(
                "compaction.chars_per_token",
                "chars_per_token must be greater than 0",
            ));
        }

        if self.compaction.enabled
            && self.compaction.threshold_tokens <= self.compaction.base_overhead_tokens
        {
            errors.push(ConfigError::warning(
                "compaction.threshold_tokens",
                "threshold is below the base overhead; every call will compact",
            ));
        }

        if self.agent.max_steps == 0 {
            errors.push(ConfigError::warning(
                "agent.max_steps",
                "step budget is unbounded; tasks only end on completion or cancellation",
            ));
        }

        for (i, rule) in self.agent.tool_sites.iter().enumerate() {
            if rule.hosts.is_empty() {
                errors.push(ConfigError::warning(
                    format!("agent.tool_sites[{i}].hosts"),
                    format!("tool \"{}\" will never be offered", rule.tool),
                ));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_only_auth_warning() {
        let issues = Config::default().validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
        assert_eq!(issues[0].field, "llm.auth");
    }

    #[test]
    fn zero_step_budget_warns_unbounded() {
        let mut cfg = Config::default();
        cfg.llm.auth.env = Some("ANTHROPIC_API_KEY".into());
        cfg.agent.max_steps = 0;
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "agent.max_steps");
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
        assert_eq!(cfg.agent.step_budget(), None);
    }

    #[test]
    fn display_includes_severity_tag() {
        let e = ConfigError::error("llm.endpoint", "endpoint must not be empty");
        assert_eq!(e.to_string(), "[ERROR] llm.endpoint: endpoint must not be empty");
    }
}
