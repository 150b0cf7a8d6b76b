//! In-memory secret storage.
//!
//! Used when the OS keyring is unavailable, as the fallback layer inside
//! [`super::FallbackSecretStore`], and in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use super::SecretStore;

/// In-memory secret storage.
///
/// Uses `Arc<RwLock<HashMap<String, String>>>` for thread-safe access from
/// multiple async tasks. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with secrets.
    pub fn with_secrets<I, K, V>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = secrets
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of stored secrets.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Remove every stored secret.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    fn name(&self) -> &str {
        "memory"
    }
}
