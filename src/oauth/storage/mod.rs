//! Secret storage for cached session tokens.
//!
//! This module provides the [`SecretStore`] trait and its implementations:
//!
//! - [`MemorySecretStore`] - in-process map, used when no OS keyring exists
//! - [`FallbackSecretStore`] - wraps a fallible [`SecretBackend`] (the OS
//!   keyring in production) and degrades to memory when the backend fails
//! - [`KeyringBackend`] - system keyring backend (requires `keyring` feature)
//!
//! # Failure Model
//!
//! A [`SecretStore`] never returns an error. Reads from a broken backend yield
//! `None`; writes that fail are logged and kept in memory for the rest of the
//! process. Losing secure-at-rest storage must never take down a working
//! session.
//!
//! # Security
//!
//! - Secret values are never logged (use `#[instrument(skip(value))]`)
//! - All implementations are thread-safe (`Send + Sync`)

mod fallback;
mod memory;

#[cfg(feature = "keyring")]
mod keyring;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use fallback::FallbackSecretStore;
pub use memory::MemorySecretStore;

#[cfg(feature = "keyring")]
pub use keyring::KeyringBackend;

use super::Result;

/// Store key for the cached access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key for the cached refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Best-effort key/value store for session secrets.
///
/// All operations are infallible by contract. Implementations must be
/// safe for concurrent use from many tasks.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret. A missing backend and a missing entry both yield `None`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Write a secret, overwriting any previous value.
    async fn set(&self, key: &str, value: &str);

    /// Remove a secret. Removing an absent key is not an error.
    async fn delete(&self, key: &str);

    /// Name of this store, for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Fallible, blocking secret backend such as the OS keyring.
///
/// Backends are wrapped by [`FallbackSecretStore`], which runs every call on
/// the blocking pool and absorbs failures.
pub trait SecretBackend: Send + Sync + 'static {
    /// Read a secret. `Ok(None)` means the entry does not exist.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write a secret.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a secret. Removing an absent entry must succeed.
    fn erase(&self, key: &str) -> Result<()>;

    /// Name of this backend, for logging.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    async fn get(&self, key: &str) -> Option<String> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) {
        (**self).delete(key).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Box<T> {
    async fn get(&self, key: &str) -> Option<String> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) {
        (**self).delete(key).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Select the secret store for this process.
///
/// Uses the OS keyring (with in-memory fallback) when a keyring backend is
/// reachable, and a plain memory store otherwise.
pub fn detect(service: &str) -> Arc<dyn SecretStore> {
    #[cfg(feature = "keyring")]
    {
        if KeyringBackend::is_available() {
            info!(service, "Using system keyring for session secrets");
            return Arc::new(FallbackSecretStore::new(KeyringBackend::new(service)));
        }
    }

    info!(service, "System keyring unavailable, session secrets kept in memory");
    Arc::new(MemorySecretStore::new())
}
