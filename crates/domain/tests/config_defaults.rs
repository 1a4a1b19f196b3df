use ba_domain::config::{AuthMethod, Config, ConfigSeverity};

#[test]
fn default_compaction_threshold() {
    let config = Config::default();
    assert!(config.compaction.enabled);
    assert_eq!(config.compaction.threshold_tokens, 170_000);
    assert_eq!(config.compaction.recent_image_messages, 3);
}

#[test]
fn default_step_budget_is_bounded() {
    let config = Config::default();
    assert_eq!(config.agent.max_steps, 50);
    assert_eq!(config.agent.step_budget(), Some(50));
}

#[test]
fn empty_file_parses_to_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.llm.endpoint, "https://api.anthropic.com");
    assert_eq!(config.llm.timeout_secs, 120);
    assert_eq!(config.logging.filter, "warn");
}

#[test]
fn llm_section_parses() {
    let toml_str = r#"
[llm]
endpoint = "https://api.openai.com"
model = "gpt-4o"
max_tokens = 2048
stream = false

[llm.auth]
env = "OPENAI_API_KEY"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.llm.endpoint, "https://api.openai.com");
    assert_eq!(config.llm.model, "gpt-4o");
    assert_eq!(config.llm.max_tokens, 2048);
    assert!(!config.llm.stream);
    assert_eq!(config.llm.auth.method, AuthMethod::ApiKey);
    assert_eq!(config.llm.auth.env.as_deref(), Some("OPENAI_API_KEY"));
    assert!(config.validate().is_empty());
}

#[test]
fn oauth_auth_parses() {
    let toml_str = r#"
[llm.auth]
method = "oauth"

[llm.auth.oauth]
token_url = "https://console.anthropic.com/v1/oauth/token"
client_id = "client-123"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.llm.auth.method, AuthMethod::Oauth);
    assert_eq!(config.llm.auth.oauth.refresh_token_secret, "oauth_refresh_token");
    assert!(config.validate().is_empty());
}

#[test]
fn unbounded_step_budget_is_expressible() {
    let config: Config = toml::from_str("[agent]\nmax_steps = 0\n").unwrap();
    assert_eq!(config.agent.step_budget(), None);
}

#[test]
fn tool_site_rules_parse() {
    let toml_str = r#"
[[agent.tool_sites]]
tool = "fill_checkout"
hosts = ["shop.example.com"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.agent.tool_sites.len(), 1);
    assert_eq!(config.agent.tool_sites[0].tool, "fill_checkout");
}

#[test]
fn bad_endpoint_scheme_is_an_error() {
    let toml_str = r#"
[llm]
endpoint = "ftp://example.com"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "llm.endpoint" && e.severity == ConfigSeverity::Error));
}
