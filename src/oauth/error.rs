//! Error types for the session manager.
//!
//! Two levels, as in the rest of the crate:
//!
//! 1. [`Error`] - every failure mode, including transport and configuration
//! 2. [`AuthError`] - authentication outcomes nested under `Error::Auth`
//!
//! Callers outside this crate only ever need [`Error::is_auth_error`]: an
//! authentication error means the current invocation cannot proceed.

use std::time::Duration;
use thiserror::Error;

use crate::oauth::token::GrantKind;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Longest response body kept inside a [`Error::MalformedResponse`].
const BODY_PREVIEW_LEN: usize = 200;

/// Unified error type for session management.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Authentication outcome that prevents obtaining a usable token.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Missing or invalid startup configuration.
    ///
    /// Always fatal; raised while building [`crate::config::Credentials`]
    /// or a grant strategy, never in the middle of a request.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure reaching the authorization server.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a success status but a body that is not
    /// the structured data the protocol requires.
    ///
    /// Usually an intermediary (maintenance page, captive portal) rather
    /// than the authorization server itself.
    #[error("Malformed response ({status}): {body}")]
    MalformedResponse {
        /// HTTP status code of the response.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Non-success response that is not a recognised OAuth error body.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code from the response.
        status: u16,
        /// Response body or status reason.
        message: String,
        /// Server-provided delay before retrying (rate limits).
        retry_after: Option<Duration>,
    },

    /// Secret storage backend failure.
    ///
    /// Never escapes a [`crate::oauth::storage::SecretStore`]; only backends
    /// produce it.
    #[error("Storage error: {0}")]
    Storage(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an API error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retry_after,
        }
    }

    /// Create a malformed-response error, keeping only a short preview of the body.
    #[must_use]
    pub fn malformed(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(BODY_PREVIEW_LEN) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        Self::MalformedResponse { status, body }
    }

    /// Check if this is a rate limit error (HTTP 429).
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }

    /// Check if this is any authentication-related error.
    ///
    /// Returns `true` for all `Error::Auth` variants and for HTTP 401
    /// responses.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Api { status: 401, .. })
    }

    /// Check if this is a transport failure worth retrying.
    ///
    /// Covers failures to connect, timeouts, and connections dropped while
    /// a request or response body was in flight. Authentication outcomes,
    /// malformed bodies, HTTP error statuses, and requests that could not be
    /// built never qualify.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(err) => {
                err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
            }
            _ => false,
        }
    }

    /// Get the retry-after duration if the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Authentication-specific outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// The user explicitly denied the device authorization request.
    #[error("Authorization denied by user")]
    AccessDenied,

    /// The device code expired before the user completed authorization.
    #[error("Device code expired - please try again")]
    DeviceCodeExpired,

    /// The refresh token is invalid, expired, or revoked.
    #[error("Invalid grant - refresh token is invalid or revoked")]
    InvalidGrant,

    /// The authorization server rejected the request with an OAuth error.
    #[error("Rejected by authorization server: {error}{}", describe(.description))]
    Rejected {
        /// OAuth `error` code.
        error: String,
        /// OAuth `error_description`, when present.
        description: Option<String>,
    },

    /// A grant attempt completed without yielding a usable token.
    ///
    /// Terminal for this attempt only; the next `ensure_valid_token` call
    /// starts again from scratch.
    #[error("Authentication failed ({grant} grant): {reason}")]
    AuthenticationFailed {
        /// Grant flow that was attempted.
        grant: GrantKind,
        /// Underlying failure.
        reason: String,
    },

    /// The session reported success but no token is readable from the
    /// secret store.
    #[error("No access token available after authentication - check secret storage")]
    TokenUnavailable,
}

impl AuthError {
    /// Create an authentication failure for the given grant.
    #[must_use]
    pub fn failed(grant: GrantKind, reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            grant,
            reason: reason.into(),
        }
    }

    /// Create a rejection from an OAuth error body.
    #[must_use]
    pub fn rejected(error: impl Into<String>, description: Option<String>) -> Self {
        Self::Rejected {
            error: error.into(),
            description,
        }
    }

    /// Check if this outcome ended an interactive device flow.
    #[must_use]
    pub fn is_terminal_device_outcome(&self) -> bool {
        matches!(self, Self::AccessDenied | Self::DeviceCodeExpired)
    }
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

#[cfg(feature = "keyring")]
impl From<keyring::Error> for Error {
    fn from(e: keyring::Error) -> Self {
        Self::Storage(format!("Keyring error: {e}"))
    }
}

/// A real connection-refused error from a port nothing listens on.
#[cfg(test)]
pub(crate) async fn connection_refused() -> Error {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap_err()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("OKTA_ORG_URL must be set");
        assert_eq!(err.to_string(), "Configuration error: OKTA_ORG_URL must be set");

        let err = Error::api(429, "rate limited", Some(Duration::from_secs(60)));
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_malformed_truncates_body() {
        let body = "<html>".repeat(100);
        let err = Error::malformed(200, &body);
        match err {
            Error::MalformedResponse { status, body } => {
                assert_eq!(status, 200);
                assert!(body.ends_with("..."));
                assert_eq!(body.chars().count(), BODY_PREVIEW_LEN + 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = Error::malformed(200, "<html>Error</html>");
        assert!(err.to_string().contains("<html>Error</html>"));
    }

    #[test]
    fn test_is_rate_limit() {
        let err = Error::api(429, "rate limited", Some(Duration::from_secs(5)));
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));

        let err = Error::api(500, "server error", None);
        assert!(!err.is_rate_limit());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_is_auth_error() {
        assert!(Error::Auth(AuthError::AccessDenied).is_auth_error());
        assert!(Error::Auth(AuthError::TokenUnavailable).is_auth_error());
        assert!(Error::api(401, "unauthorized", None).is_auth_error());
        assert!(!Error::api(404, "not found", None).is_auth_error());
        assert!(!Error::config("bad").is_auth_error());
    }

    #[tokio::test]
    async fn test_is_transient() {
        assert!(connection_refused().await.is_transient());

        assert!(!Error::Auth(AuthError::failed(GrantKind::Device, "boom")).is_transient());
        assert!(!Error::malformed(200, "<html>").is_transient());
        assert!(!Error::api(503, "unavailable", None).is_transient());
        assert!(!Error::config("bad").is_transient());
        assert!(!Error::storage("locked").is_transient());
    }

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::failed(GrantKind::Service, "no access_token in response");
        assert_eq!(
            err.to_string(),
            "Authentication failed (service grant): no access_token in response"
        );

        let err = AuthError::rejected("invalid_client", Some("bad assertion".into()));
        assert_eq!(
            err.to_string(),
            "Rejected by authorization server: invalid_client (bad assertion)"
        );

        let err = AuthError::rejected("invalid_scope", None);
        assert_eq!(err.to_string(), "Rejected by authorization server: invalid_scope");
    }

    #[test]
    fn test_terminal_device_outcomes() {
        assert!(AuthError::AccessDenied.is_terminal_device_outcome());
        assert!(AuthError::DeviceCodeExpired.is_terminal_device_outcome());
        assert!(!AuthError::InvalidGrant.is_terminal_device_outcome());
    }

    #[test]
    fn test_error_conversions() {
        let url_err = "not a url".parse::<url::Url>().unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));

        let err: Error = AuthError::AccessDenied.into();
        assert!(matches!(err, Error::Auth(AuthError::AccessDenied)));
    }
}
