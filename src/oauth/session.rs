//! Session state machine shared by every caller of the org API.
//!
//! [`SessionManager::ensure_valid_token`] is the single choke point that
//! decides whether the cached token can be used and, if not, renews it:
//!
//! ```text
//! Fresh ──stale──► Refreshing ──ok──────────────────────► Fresh
//!                      │
//!                      └─rejected / no refresh token──► ReAuthenticating ──ok──► Fresh
//!                                                              └─error──► Failed
//! ```
//!
//! The whole check-then-renew sequence runs under one async mutex, so any
//! number of concurrent callers that observe a stale session produce exactly
//! one renewal; the rest wait and re-check.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::grant::GrantStrategy;
use super::storage::{SecretStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use super::token::{mask_token, GrantKind, Session, TokenGrant};
use super::{AuthError, Error, Result};

/// Where the session currently is in its renewal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionPhase {
    /// No token has been minted yet, or the session was invalidated.
    Unauthenticated = 0,
    /// A token was minted and is cached.
    Fresh = 1,
    /// Renewing with a refresh token.
    Refreshing = 2,
    /// Running the full grant flow.
    ReAuthenticating = 3,
    /// The last renewal attempt failed.
    Failed = 4,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Fresh,
            2 => Self::Refreshing,
            3 => Self::ReAuthenticating,
            4 => Self::Failed,
            _ => Self::Unauthenticated,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Fresh => "fresh",
            Self::Refreshing => "refreshing",
            Self::ReAuthenticating => "re-authenticating",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the session without any secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub grant_kind: GrantKind,
    pub phase: SessionPhase,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub obtained_at: Option<DateTime<Utc>>,
    pub age: Option<Duration>,
}

/// Owns the cached [`Session`] and serializes its renewal.
pub struct SessionManager<G, S> {
    grant: G,
    store: S,
    session: RwLock<Session>,
    refresh_lock: Mutex<()>,
    phase: AtomicU8,
}

impl<G, S> std::fmt::Debug for SessionManager<G, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &SessionPhase::from_u8(self.phase.load(Ordering::Acquire)))
            .finish_non_exhaustive()
    }
}

impl<G: GrantStrategy, S: SecretStore> SessionManager<G, S> {
    /// Create a manager with an empty session.
    pub fn new(grant: G, store: S) -> Self {
        let kind = grant.kind();
        Self::with_session(grant, store, Session::empty(kind))
    }

    /// Create a manager starting from an existing session.
    pub fn with_session(grant: G, store: S, session: Session) -> Self {
        let phase = if session.has_token() {
            SessionPhase::Fresh
        } else {
            SessionPhase::Unauthenticated
        };

        Self {
            grant,
            store,
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
            phase: AtomicU8::new(phase as u8),
        }
    }

    /// The grant flow this manager renews with.
    pub fn grant(&self) -> &G {
        &self.grant
    }

    /// The secret store tokens are persisted to.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current phase of the renewal cycle.
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Describe the session without exposing tokens.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.read().await;
        SessionSnapshot {
            grant_kind: session.grant_kind,
            phase: self.phase(),
            has_access_token: session.access_token.is_some(),
            has_refresh_token: session.refresh_token.is_some(),
            obtained_at: session.obtained_at,
            age: session.age_at(Utc::now()),
        }
    }

    /// Make sure a token younger than `max_age` is cached.
    ///
    /// Returns immediately, without any network call, when the cached token
    /// is fresh. Otherwise renews it: refresh token first for refreshable
    /// grants, then the full grant flow.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthenticationFailed`] when no token could be
    /// obtained, or the connection error itself when the authorization server
    /// could not be reached (see [`Error::is_transient`]). The next call
    /// starts over.
    pub async fn ensure_valid_token(&self, max_age: Duration) -> Result<()> {
        if self.session.read().await.is_fresh(max_age) {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have renewed while we waited for the lock.
        if self.session.read().await.is_fresh(max_age) {
            debug!("Session renewed by a concurrent caller");
            return Ok(());
        }

        self.renew().await
    }

    /// Drop cached tokens so the next call renews.
    ///
    /// Call this when the org rejects the current token;
    /// [`ClientFactory::send`](crate::oauth::ClientFactory::send) does so on
    /// a 401. A persisted refresh token is still tried first.
    ///
    /// Does not wait for an in-flight renewal; if one completes afterwards
    /// its token is kept.
    pub async fn invalidate(&self) {
        let mut session = self.session.write().await;
        *session = Session::empty(session.grant_kind);
        self.set_phase(SessionPhase::Unauthenticated);
        info!("Session invalidated");
    }

    /// Invalidate the session and delete both secrets from the store.
    pub async fn logout(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.invalidate().await;
        self.store.delete(ACCESS_TOKEN_KEY).await;
        self.store.delete(REFRESH_TOKEN_KEY).await;
        info!(store = self.store.name(), "Logged out, cached secrets removed");
    }

    /// Renew the session. Caller must hold `refresh_lock`.
    #[instrument(skip(self), fields(grant = %self.grant.kind()))]
    async fn renew(&self) -> Result<()> {
        let kind = self.grant.kind();

        if kind.is_refreshable() {
            if let Some(refresh_token) = self.current_refresh_token().await {
                self.set_phase(SessionPhase::Refreshing);
                debug!(refresh_token = %mask_token(&refresh_token), "Refreshing session");

                match self.grant.refresh(&refresh_token).await {
                    Ok(grant) => {
                        self.install(kind, grant).await;
                        info!("Session refreshed");
                        return Ok(());
                    }
                    Err(Error::Auth(e)) => {
                        warn!(error = %e, "Refresh token rejected, re-authenticating");
                        self.forget_refresh_token().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Refresh request failed, re-authenticating");
                    }
                }
            } else {
                debug!("No refresh token available");
            }
        }

        self.set_phase(SessionPhase::ReAuthenticating);
        info!("Authenticating");

        match self.grant.obtain_token().await {
            Ok(grant) => {
                self.install(kind, grant).await;
                info!("Authentication succeeded");
                Ok(())
            }
            Err(e) if e.is_transient() => {
                self.set_phase(SessionPhase::Failed);
                warn!(error = %e, "Authorization server unreachable");
                Err(e)
            }
            Err(e) => {
                self.set_phase(SessionPhase::Failed);
                error!(error = %e, "Authentication failed");
                Err(AuthError::failed(kind, e.to_string()).into())
            }
        }
    }

    /// Refresh token from the session, or one persisted by an earlier process.
    async fn current_refresh_token(&self) -> Option<String> {
        if let Some(token) = self.session.read().await.refresh_token.clone() {
            return Some(token);
        }
        let stored = self.store.get(REFRESH_TOKEN_KEY).await;
        if stored.is_some() {
            debug!(store = self.store.name(), "Using persisted refresh token");
        }
        stored
    }

    async fn forget_refresh_token(&self) {
        self.session.write().await.refresh_token = None;
        self.store.delete(REFRESH_TOKEN_KEY).await;
    }

    /// Persist and cache a newly minted token.
    ///
    /// The store is written first so that a caller who sees the fresh
    /// session can always read the token back.
    async fn install(&self, kind: GrantKind, grant: TokenGrant) {
        self.store.set(ACCESS_TOKEN_KEY, &grant.access_token).await;
        if let Some(refresh_token) = &grant.refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, refresh_token).await;
        }

        *self.session.write().await = Session::minted(kind, grant, Utc::now());
        self.set_phase(SessionPhase::Fresh);
    }
}
