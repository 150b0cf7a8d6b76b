//! OAuth 2.0 Device Authorization Grant (RFC 8628) against Okta.
//!
//! ## Flow Overview
//!
//! 1. [`DeviceGrant::initiate`] requests a device code and presents the
//!    verification URL to the user
//! 2. [`DeviceGrant::poll`] polls the token endpoint until the user approves,
//!    denies, or the ticket expires
//! 3. [`DeviceGrant::refresh_token`] renews the access token with the refresh token
//!    issued in step 2 (the grant asks for `offline_access`)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{parse_token_reply, post_form, GrantStrategy, OAuthErrorBody, TokenReply};
use crate::oauth::constants::{
    DEFAULT_POLL_INTERVAL_SECS, DEVICE_AUTHORIZE_PATH, DEVICE_CODE_GRANT_TYPE,
    ERROR_ACCESS_DENIED, ERROR_AUTHORIZATION_PENDING, ERROR_EXPIRED_TOKEN, ERROR_INVALID_GRANT,
    ERROR_SLOW_DOWN, OFFLINE_ACCESS_SCOPE, REFRESH_TOKEN_GRANT_TYPE, SLOW_DOWN_INCREMENT_SECS,
    TOKEN_PATH,
};
use crate::oauth::token::{mask_token, GrantKind, TokenGrant};
use crate::oauth::{AuthError, Error, Result};

/// An in-progress device authorization.
///
/// Valid for one authentication attempt only.
#[derive(Debug, Clone)]
pub struct DeviceAuthorizationTicket {
    /// The device verification code (internal, for polling).
    pub device_code: String,
    /// The user-facing code to enter at the verification URL.
    pub user_code: String,
    /// URL the user should open, with the code pre-filled when the server
    /// supports it.
    pub verification_url: String,
    /// Minimum delay between polling requests.
    pub poll_interval: Duration,
    /// After this instant the device code is no longer accepted.
    pub expires_at: DateTime<Utc>,
}

impl DeviceAuthorizationTicket {
    /// Whether the ticket has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Device authorization endpoint response.
#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

/// Result of a single polling request.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// User has not yet completed authorization, keep polling.
    Pending,
    /// Received a "slow_down" response, increase poll interval.
    SlowDown,
    /// Successfully obtained tokens.
    Complete(TokenGrant),
}

/// Shows the verification URL to the user.
pub trait VerificationPresenter: Send + Sync {
    /// Called exactly once for every ticket issued by [`DeviceGrant::initiate`].
    fn present(&self, ticket: &DeviceAuthorizationTicket);
}

/// Presenter that prints instructions to stderr and optionally opens the
/// system browser.
///
/// Stdout is left untouched; it carries the tool protocol when running
/// under an MCP host.
#[derive(Debug, Clone)]
pub struct BrowserPresenter {
    open_browser: bool,
}

impl BrowserPresenter {
    /// Print instructions and open the browser.
    pub fn new() -> Self {
        Self { open_browser: true }
    }

    /// Print instructions only.
    pub fn headless() -> Self {
        Self {
            open_browser: false,
        }
    }
}

impl Default for BrowserPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationPresenter for BrowserPresenter {
    fn present(&self, ticket: &DeviceAuthorizationTicket) {
        info!(
            verification_url = %ticket.verification_url,
            user_code = %ticket.user_code,
            expires_at = %ticket.expires_at,
            "Waiting for device authorization"
        );
        eprintln!(
            "To authorize this device, visit:\n\n    {}\n\nand confirm the code {}",
            ticket.verification_url, ticket.user_code
        );

        if self.open_browser {
            if let Err(e) = open::that(&ticket.verification_url) {
                warn!(error = %e, "Failed to open browser, open the URL manually");
            }
        }
    }
}

/// Interactive device authorization grant.
pub struct DeviceGrant {
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
    client_id: String,
    scope: String,
    presenter: Arc<dyn VerificationPresenter>,
}

impl std::fmt::Debug for DeviceGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGrant")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl DeviceGrant {
    /// Create a device grant for the org at `org_url`.
    ///
    /// `offline_access` is added to `scopes` so the server issues a refresh
    /// token.
    pub fn new(org_url: &str, client_id: &str, scopes: &[String], http: reqwest::Client) -> Self {
        let mut scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
        if !scopes.contains(&OFFLINE_ACCESS_SCOPE) {
            scopes.push(OFFLINE_ACCESS_SCOPE);
        }

        Self {
            http,
            authorize_url: format!("{org_url}{DEVICE_AUTHORIZE_PATH}"),
            token_url: format!("{org_url}{TOKEN_PATH}"),
            client_id: client_id.to_string(),
            scope: scopes.join(" "),
            presenter: Arc::new(BrowserPresenter::new()),
        }
    }

    /// Replace how the verification URL is shown to the user.
    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn VerificationPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Space-separated scopes sent with the authorization request.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Start a device authorization and present it to the user.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] if the server cannot be reached
    /// - [`Error::MalformedResponse`] if the server answers with something
    ///   other than the expected JSON document
    /// - [`AuthError::Rejected`] if the server rejects the client or scopes
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub async fn initiate(&self) -> Result<DeviceAuthorizationTicket> {
        info!("Starting device authorization");

        let (status, body) = post_form(
            &self.http,
            &self.authorize_url,
            &[("client_id", self.client_id.as_str()), ("scope", self.scope.as_str())],
        )
        .await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<OAuthErrorBody>(&body) {
                warn!(status = status.as_u16(), error = %error.error, "Device authorization rejected");
                return Err(error.into_rejection().into());
            }
            return Err(Error::malformed(status.as_u16(), &body));
        }

        let response: DeviceAuthorizationResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(status = status.as_u16(), error = %e, "Device authorization response is not valid JSON");
            Error::malformed(status.as_u16(), &body)
        })?;

        let expires_at = i64::try_from(response.expires_in)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                warn!(expires_in = response.expires_in, "Device code lifetime out of range");
                Error::malformed(status.as_u16(), &body)
            })?;

        let ticket = DeviceAuthorizationTicket {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_url: response
                .verification_uri_complete
                .unwrap_or(response.verification_uri),
            poll_interval: Duration::from_secs(
                response.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            expires_at,
        };

        debug!(
            user_code = %ticket.user_code,
            interval_secs = ticket.poll_interval.as_secs(),
            expires_in = response.expires_in,
            "Device authorization started"
        );

        self.presenter.present(&ticket);
        Ok(ticket)
    }

    /// Make one polling request for `device_code`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccessDenied`] or [`AuthError::DeviceCodeExpired`]
    /// for terminal outcomes, [`AuthError::Rejected`] for other OAuth errors,
    /// and [`Error::MalformedResponse`] for unparsable bodies.
    pub async fn poll_once(&self, device_code: &str) -> Result<PollResult> {
        debug!("Polling for device authorization");

        let (status, body) = post_form(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ("device_code", device_code),
                ("client_id", self.client_id.as_str()),
            ],
        )
        .await?;

        match parse_token_reply(status, &body)? {
            TokenReply::Issued(grant) => {
                info!(
                    token_preview = %mask_token(&grant.access_token),
                    "Device authorization completed"
                );
                Ok(PollResult::Complete(grant))
            }
            TokenReply::Denied(error) => match error.error.as_str() {
                ERROR_AUTHORIZATION_PENDING => Ok(PollResult::Pending),
                ERROR_SLOW_DOWN => Ok(PollResult::SlowDown),
                ERROR_ACCESS_DENIED => {
                    warn!("User denied authorization");
                    Err(AuthError::AccessDenied.into())
                }
                ERROR_EXPIRED_TOKEN => {
                    warn!("Device code expired");
                    Err(AuthError::DeviceCodeExpired.into())
                }
                _ => Err(error.into_rejection().into()),
            },
        }
    }

    /// Poll until the user finishes authorization or the ticket expires.
    ///
    /// Waits `poll_interval` before every request. Malformed responses and
    /// transport failures are logged and polling continues. A wait never
    /// runs past `expires_at`, and once it has passed no further request is
    /// made.
    ///
    /// # Errors
    ///
    /// - [`AuthError::DeviceCodeExpired`] when the deadline passes
    /// - [`AuthError::AccessDenied`] when the user declines
    /// - [`AuthError::Rejected`] for any other OAuth error
    #[instrument(skip(self, ticket), fields(user_code = %ticket.user_code))]
    pub async fn poll(&self, ticket: &DeviceAuthorizationTicket) -> Result<TokenGrant> {
        let mut interval = ticket.poll_interval;
        let mut attempts = 0u32;

        loop {
            let remaining = match (ticket.expires_at - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => break,
            };
            if remaining <= interval {
                // The next poll would land after the deadline.
                tokio::time::sleep(remaining).await;
                break;
            }
            tokio::time::sleep(interval).await;
            if ticket.is_expired_at(Utc::now()) {
                break;
            }

            attempts += 1;
            match self.poll_once(&ticket.device_code).await {
                Ok(PollResult::Complete(grant)) => return Ok(grant),
                Ok(PollResult::Pending) => continue,
                Ok(PollResult::SlowDown) => {
                    interval = interval.saturating_add(Duration::from_secs(SLOW_DOWN_INCREMENT_SECS));
                    debug!(interval_secs = interval.as_secs(), "Received slow_down, increasing interval");
                }
                Err(e @ Error::MalformedResponse { .. }) => {
                    warn!(attempts, error = %e, "Ignoring malformed polling response");
                }
                Err(e) if e.is_transient() => {
                    warn!(attempts, error = %e, "Polling request failed, will retry");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(attempts, "Device code expired before authorization completed");
        Err(AuthError::DeviceCodeExpired.into())
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The previous refresh token is kept when the server does not rotate it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidGrant`] when the refresh token is rejected.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        debug!(refresh_token = %mask_token(refresh_token), "Refreshing access token");

        let (status, body) = post_form(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", REFRESH_TOKEN_GRANT_TYPE),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ],
        )
        .await?;

        match parse_token_reply(status, &body)? {
            TokenReply::Issued(mut grant) => {
                if grant.refresh_token.is_none() {
                    grant.refresh_token = Some(refresh_token.to_string());
                }
                info!(token_preview = %mask_token(&grant.access_token), "Access token refreshed");
                Ok(grant)
            }
            TokenReply::Denied(error) if error.error == ERROR_INVALID_GRANT => {
                Err(AuthError::InvalidGrant.into())
            }
            TokenReply::Denied(error) => Err(error.into_rejection().into()),
        }
    }
}

#[async_trait]
impl GrantStrategy for DeviceGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::Device
    }

    async fn obtain_token(&self) -> Result<TokenGrant> {
        let ticket = self.initiate().await?;
        self.poll(&ticket).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.refresh_token(refresh_token).await
    }
}
