//! Secret store that degrades to memory when its backend fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{MemorySecretStore, SecretBackend, SecretStore};
use crate::oauth::{Error, Result};

/// Wraps a blocking [`SecretBackend`] behind the infallible [`SecretStore`]
/// contract.
///
/// The first backend write failure flips the store into degraded mode: from
/// then on every read and write goes to an in-process map only, for the rest
/// of the process. Read failures before that point yield `None`.
#[derive(Debug)]
pub struct FallbackSecretStore<B> {
    backend: Arc<B>,
    fallback: MemorySecretStore,
    degraded: AtomicBool,
}

impl<B: SecretBackend> FallbackSecretStore<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            fallback: MemorySecretStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the backend has failed and secrets now live in memory.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn degrade(&self, key: &str, err: &Error) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                backend = self.backend.name(),
                key,
                error = %err,
                "Secret backend failed, keeping secrets in memory for this process"
            );
        } else {
            debug!(backend = self.backend.name(), key, error = %err, "Secret backend failed again");
        }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&B) -> Result<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || op(backend.as_ref()))
            .await
            .map_err(|e| Error::storage(format!("Secret backend task failed: {e}")))?
    }
}

#[async_trait]
impl<B: SecretBackend> SecretStore for FallbackSecretStore<B> {
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    async fn get(&self, key: &str) -> Option<String> {
        if self.is_degraded() {
            return self.fallback.get(key).await;
        }

        let owned = key.to_string();
        match self.blocking(move |b| b.read(&owned)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read secret from backend");
                None
            }
        }
    }

    #[instrument(skip(self, value), fields(backend = self.backend.name()))]
    async fn set(&self, key: &str, value: &str) {
        if !self.is_degraded() {
            let (owned_key, owned_value) = (key.to_string(), value.to_string());
            match self.blocking(move |b| b.write(&owned_key, &owned_value)).await {
                Ok(()) => return,
                Err(e) => self.degrade(key, &e),
            }
        }
        self.fallback.set(key, value).await;
    }

    #[instrument(skip(self), fields(backend = self.backend.name()))]
    async fn delete(&self, key: &str) {
        self.fallback.delete(key).await;
        if self.is_degraded() {
            return;
        }

        let owned = key.to_string();
        if let Err(e) = self.blocking(move |b| b.erase(&owned)).await {
            warn!(key, error = %e, "Failed to delete secret from backend");
        }
    }

    fn name(&self) -> &str {
        if self.is_degraded() {
            "memory"
        } else {
            self.backend.name()
        }
    }
}
