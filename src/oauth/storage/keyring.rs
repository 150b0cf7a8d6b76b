//! System keyring secret backend (feature-gated).
//!
//! Stores secrets in the platform's native credential store:
//! - macOS: Keychain
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//! - Windows: Credential Manager
//!
//! Each secret is its own entry under one service name, with the secret key
//! (`access_token`, `refresh_token`) as the account.

use std::sync::OnceLock;

use keyring::Entry;

use super::SecretBackend;
use crate::oauth::{Error, Result};

/// Cached keyring availability status.
static KEYRING_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Keyring-based secret backend.
///
/// All calls block; wrap it in [`super::FallbackSecretStore`] to use it from
/// async code.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    /// Create a backend storing entries under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Service name used for every entry.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check if the system keyring is available.
    ///
    /// Performs a trial read once per process and caches the result.
    pub fn is_available() -> bool {
        *KEYRING_AVAILABLE.get_or_init(Self::check_availability)
    }

    fn check_availability() -> bool {
        match Entry::new("okta-session-availability", "availability-check") {
            Ok(entry) => match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(keyring::Error::NoStorageAccess(_))
                | Err(keyring::Error::PlatformFailure(_)) => false,
                // Other errors might be transient
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key)
            .map_err(|e| Error::storage(format!("Failed to create keyring entry: {e}")))
    }
}

impl SecretBackend for KeyringBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
