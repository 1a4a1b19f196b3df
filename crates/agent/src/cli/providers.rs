use ba_domain::config::Config;
use ba_providers::ProviderRegistry;

/// Print every registered adapter, marking the one `[llm]` selects.
pub fn list(config: &Config) {
    let registry = ProviderRegistry::with_defaults();
    let selected = registry
        .select(&config.llm.endpoint, config.llm.provider.as_deref())
        .map(|a| a.name());

    for name in registry.names() {
        let marker = if Some(name) == selected { "*" } else { " " };
        println!("{marker} {name}");
    }
    match selected {
        Some(name) => println!("\n{} -> {name}", config.llm.endpoint),
        None => println!("\nno adapter registered"),
    }
}
