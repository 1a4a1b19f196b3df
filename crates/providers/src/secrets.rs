//! Named secret storage (OAuth tokens, API keys).

use ba_domain::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the secret does not exist.
    async fn get(&self, name: &str) -> Result<Option<String>>;
    async fn set(&self, name: &str, value: &str) -> Result<()>;
    /// Removing a missing secret is not an error.
    async fn remove(&self, name: &str) -> Result<()>;
}

// ── OS keychain ─────────────────────────────────────────────────────

/// Secrets in the platform keychain, one entry per name under `service`.
///
/// `keyring` is synchronous, so every call runs on a blocking thread.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn blocking<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> Result<T> + Send + 'static,
    {
        let entry = keyring::Entry::new(&self.service, name)
            .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
        tokio::task::spawn_blocking(move || f(entry))
            .await
            .map_err(|e| Error::Other(format!("keyring task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        self.blocking(name, |entry| match entry.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Auth(format!("keyring get_password failed: {e}"))),
        })
        .await
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        let value = value.to_owned();
        self.blocking(name, move |entry| {
            entry
                .set_password(&value)
                .map_err(|e| Error::Auth(format!("keyring set_password failed: {e}")))
        })
        .await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.blocking(name, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Auth(format!("keyring delete failed: {e}"))),
        })
        .await
    }
}

// ── In-process ──────────────────────────────────────────────────────

/// Process-local store for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: &str) -> Self {
        self.values.lock().insert(name.to_owned(), value.to_owned());
        self
    }
}

#[async_trait::async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.values.lock().insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.values.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_get_remove() {
        let store = MemorySecretStore::new();
        assert_eq!(store.get("oauth_access_token").await.unwrap(), None);

        store.set("oauth_access_token", "tok-1").await.unwrap();
        assert_eq!(
            store.get("oauth_access_token").await.unwrap().as_deref(),
            Some("tok-1")
        );

        store.remove("oauth_access_token").await.unwrap();
        store.remove("oauth_access_token").await.unwrap();
        assert_eq!(store.get("oauth_access_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn with_seeds_values() {
        let store = MemorySecretStore::new().with("a", "1").with("b", "2");
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }
}
