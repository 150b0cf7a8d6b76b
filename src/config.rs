//! Startup configuration.
//!
//! Values are layered with `figment`, later layers winning:
//!
//! 1. built-in defaults
//! 2. `<config_dir>/okta-session/config.toml`, if present
//! 3. `OKTA_*` environment variables
//!
//! The merged result is validated once into immutable [`Credentials`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::oauth::constants::{
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_KEYRING_SERVICE, DEFAULT_SCOPES, DEFAULT_TOKEN_MAX_AGE,
};
use crate::oauth::{Error, GrantKind, Result};

/// Prefix for environment variables.
pub const ENV_PREFIX: &str = "OKTA_";

/// Scopes as written in configuration: a space-separated string (the
/// environment form) or a TOML array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeList {
    Joined(String),
    List(Vec<String>),
}

impl ScopeList {
    fn into_vec(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            Self::Joined(joined) => joined.split_whitespace().map(String::from).collect(),
            Self::List(list) => list,
        };

        let mut scopes: Vec<String> = Vec::with_capacity(raw.len());
        for scope in raw {
            let scope = scope.trim();
            if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }
}

/// Configuration as loaded, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub org_url: Option<String>,
    pub client_id: Option<String>,
    pub scopes: Option<ScopeList>,
    pub private_key: Option<String>,
    pub key_id: Option<String>,
    /// HTTP timeout in seconds.
    pub http_timeout: u64,
    /// Token freshness window in seconds.
    pub token_max_age: u64,
    pub keyring_service: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            org_url: None,
            client_id: None,
            scopes: None,
            private_key: None,
            key_id: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT_SECS,
            token_max_age: DEFAULT_TOKEN_MAX_AGE.as_secs(),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
        }
    }
}

/// Validated, immutable configuration.
///
/// A private key selects the service grant; without one the interactive
/// device grant is used.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    org_url: String,
    /// OAuth client id of the registered application.
    pub client_id: String,
    /// Requested scopes, de-duplicated, in configuration order.
    pub scopes: Vec<String>,
    private_key: Option<String>,
    key_id: Option<String>,
    /// Timeout for every HTTP request.
    pub http_timeout: Duration,
    /// Age after which a cached token is renewed.
    pub token_max_age: Duration,
    /// Keyring service name for cached secrets.
    pub keyring_service: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("org_url", &self.org_url)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("key_id", &self.key_id)
            .field("http_timeout", &self.http_timeout)
            .field("token_max_age", &self.token_max_age)
            .field("keyring_service", &self.keyring_service)
            .finish()
    }
}

impl Credentials {
    /// Create credentials for the device grant with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `org_url` is not a valid URL or
    /// `client_id` is empty.
    pub fn new(org_url: &str, client_id: &str) -> Result<Self> {
        Self::validate(RawConfig {
            org_url: Some(org_url.to_string()),
            client_id: Some(client_id.to_string()),
            ..RawConfig::default()
        })
    }

    /// Switch to the service grant with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either value is empty.
    pub fn with_service_key(mut self, private_key_pem: &str, key_id: &str) -> Result<Self> {
        self.private_key = normalize_private_key(Some(private_key_pem.to_string()));
        self.key_id = non_empty(Some(key_id.to_string()));
        if self.private_key.is_none() || self.key_id.is_none() {
            return Err(Error::config("private key and key id must both be non-empty"));
        }
        Ok(self)
    }

    /// Replace the requested scopes.
    #[must_use]
    pub fn with_scopes<I, T>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.scopes = ScopeList::List(scopes.into_iter().map(Into::into).collect()).into_vec();
        self
    }

    /// Override the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Load from defaults, the config file, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required values are missing or invalid.
    pub fn load() -> Result<Self> {
        Self::from_figment(&Self::figment(config_path().as_deref()))
    }

    /// Build the layered provider, reading `file` if given.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RawConfig::default()));
        if let Some(path) = file {
            debug!(path = %path.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract and validate credentials from a provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required values are missing or invalid.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let raw: RawConfig = figment
            .extract()
            .map_err(|e| Error::config(format!("Invalid configuration: {e}")))?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self> {
        let (Some(org_url), Some(client_id)) = (non_empty(raw.org_url), non_empty(raw.client_id))
        else {
            return Err(Error::config("OKTA_ORG_URL and OKTA_CLIENT_ID must be set"));
        };

        let org_url = normalize_org_url(&org_url)?;
        let private_key = normalize_private_key(raw.private_key);
        let key_id = non_empty(raw.key_id);

        if private_key.is_some() && key_id.is_none() {
            return Err(Error::config(
                "OKTA_KEY_ID must be set when OKTA_PRIVATE_KEY is provided",
            ));
        }
        if private_key.is_none() && key_id.is_some() {
            warn!("OKTA_KEY_ID is set without OKTA_PRIVATE_KEY and will be ignored");
        }

        let mut scopes = raw.scopes.map(ScopeList::into_vec).unwrap_or_default();
        if scopes.is_empty() {
            scopes = DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect();
        }

        Ok(Self {
            org_url,
            client_id,
            scopes,
            key_id: private_key.as_ref().and(key_id),
            private_key,
            http_timeout: Duration::from_secs(raw.http_timeout),
            token_max_age: Duration::from_secs(raw.token_max_age),
            keyring_service: raw.keyring_service,
        })
    }

    /// Org base URL without a trailing slash.
    pub fn org_url(&self) -> &str {
        &self.org_url
    }

    /// Private key PEM and key id, when the service grant is configured.
    pub fn service_key(&self) -> Option<(&str, &str)> {
        match (&self.private_key, &self.key_id) {
            (Some(key), Some(kid)) => Some((key.as_str(), kid.as_str())),
            _ => None,
        }
    }

    /// Grant flow these credentials select.
    pub fn grant_kind(&self) -> GrantKind {
        if self.service_key().is_some() {
            GrantKind::Service
        } else {
            GrantKind::Device
        }
    }
}

/// Default configuration file location.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("okta-session").join("config.toml"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Add `https://` when no scheme is given and drop trailing slashes.
fn normalize_org_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| Error::config(format!("Invalid OKTA_ORG_URL '{raw}': {e}")))?;
    if url.host_str().is_none() {
        return Err(Error::config(format!("OKTA_ORG_URL '{raw}' has no host")));
    }

    Ok(with_scheme.trim_end_matches('/').to_string())
}

/// Expand `\n` escapes, which is how multi-line keys survive `.env` files.
fn normalize_private_key(raw: Option<String>) -> Option<String> {
    non_empty(raw).map(|key| key.replace("\\n", "\n"))
}
