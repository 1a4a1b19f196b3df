//! `browseragent secret`: manage named secrets in the OS keychain.

use anyhow::Context;

use ba_providers::SecretStore;

pub async fn set(store: &dyn SecretStore, name: &str) -> anyhow::Result<()> {
    let value = rpassword::read_password_from_tty(Some(&format!("Value for {name}: ")))
        .context("reading secret from terminal")?;
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("empty value, nothing stored");
    }
    store
        .set(name, value)
        .await
        .with_context(|| format!("storing {name}"))?;
    println!("Stored {name}");
    Ok(())
}

pub async fn get(store: &dyn SecretStore, name: &str) -> anyhow::Result<()> {
    match store.get(name).await.with_context(|| format!("reading {name}"))? {
        Some(value) => println!("{name} = {}", mask(&value)),
        None => println!("{name} is not set"),
    }
    Ok(())
}

pub async fn remove(store: &dyn SecretStore, name: &str) -> anyhow::Result<()> {
    store
        .remove(name)
        .await
        .with_context(|| format!("removing {name}"))?;
    println!("Removed {name}");
    Ok(())
}

/// First four characters and the length; short values are fully hidden.
fn mask(value: &str) -> String {
    let len = value.chars().count();
    if len <= 8 {
        return "*".repeat(len);
    }
    let head: String = value.chars().take(4).collect();
    format!("{head}... ({len} chars)")
}
