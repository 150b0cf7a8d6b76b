//! Session and token data types.
//!
//! [`Session`] is the only piece of mutable state shared across callers and
//! is owned by [`crate::oauth::SessionManager`]. Staleness is computed from
//! `obtained_at` alone; the platform's tokens do not reliably expose an
//! expiry claim, so none is tracked here.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Which grant flow minted (or will mint) the session's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantKind {
    /// Interactive OAuth 2.0 Device Authorization Grant.
    Device,
    /// Non-interactive client credentials with a private-key JWT assertion.
    Service,
}

impl GrantKind {
    /// Whether tokens minted by this grant can be renewed with a refresh token.
    #[must_use]
    pub fn is_refreshable(self) -> bool {
        matches!(self, Self::Device)
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::Service => f.write_str("service"),
        }
    }
}

/// Token material returned by a successful grant.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, issued only by refreshable flows.
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    /// Create a grant carrying only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    /// Attach a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_token))
            .finish()
    }
}

/// Cached session state.
///
/// Always replaced as a whole value; a token and its `obtained_at` are
/// never observed out of step.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Current bearer token, if one has been minted.
    pub access_token: Option<String>,
    /// Refresh token from the last device-flow grant.
    pub refresh_token: Option<String>,
    /// When `access_token` was minted. `None` means never.
    pub obtained_at: Option<DateTime<Utc>>,
    /// Grant flow responsible for this session.
    pub grant_kind: GrantKind,
}

impl Session {
    /// An empty session for the given grant.
    #[must_use]
    pub fn empty(grant_kind: GrantKind) -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            obtained_at: None,
            grant_kind,
        }
    }

    /// A session holding freshly minted tokens.
    #[must_use]
    pub fn minted(grant_kind: GrantKind, grant: TokenGrant, obtained_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Some(grant.access_token),
            refresh_token: grant.refresh_token,
            obtained_at: Some(obtained_at),
            grant_kind,
        }
    }

    /// Age of the cached token at `now`, or `None` if nothing was minted.
    ///
    /// A timestamp in the future (clock stepped backwards) counts as age zero.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let obtained_at = self.obtained_at?;
        Some((now - obtained_at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Whether the session holds a token younger than `max_age` at `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        if self.access_token.is_none() {
            return false;
        }
        self.age_at(now).is_some_and(|age| age < max_age)
    }

    /// Whether the session holds a token younger than `max_age` right now.
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.is_fresh_at(Utc::now(), max_age)
    }

    /// Whether an access token is cached, regardless of age.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.access_token.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_deref().map(mask_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_token))
            .field("obtained_at", &self.obtained_at)
            .field("grant_kind", &self.grant_kind)
            .finish()
    }
}

/// Masks a token for safe logging.
///
/// Shows the first 4 characters followed by asterisks.
#[must_use]
pub fn mask_token(token: &str) -> String {
    match token.char_indices().nth(4) {
        Some((idx, _)) => format!("{}****", &token[..idx]),
        None => "*".repeat(token.chars().count()),
    }
}
