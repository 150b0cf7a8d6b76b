//! Grant flows that mint access tokens.
//!
//! Two interchangeable strategies sit behind [`GrantStrategy`]:
//!
//! - [`DeviceGrant`] - interactive OAuth 2.0 Device Authorization Grant
//!   (RFC 8628) with refresh-token renewal
//! - [`ServiceGrant`] - client credentials authenticated by a signed private
//!   key JWT (RFC 7523); never refreshes, always re-mints
//!
//! [`Grant`] is the closed set used in production, chosen from
//! [`Credentials`] at startup. [`crate::oauth::SessionManager`] only ever
//! talks to the trait.

mod device;
mod service;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

pub use device::{
    BrowserPresenter, DeviceAuthorizationTicket, DeviceGrant, PollResult, VerificationPresenter,
};
pub use service::{AssertionClaims, ServiceGrant};

use super::token::{GrantKind, TokenGrant};
use super::{AuthError, Error, Result};
use crate::config::Credentials;

/// A flow able to mint access tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GrantStrategy: Send + Sync {
    /// Which flow this is.
    fn kind(&self) -> GrantKind;

    /// Mint a brand-new token, interactively if the flow requires it.
    async fn obtain_token(&self) -> Result<TokenGrant>;

    /// Exchange a refresh token for a new access token.
    ///
    /// Only refreshable flows override this.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let _ = refresh_token;
        Err(AuthError::failed(self.kind(), "grant does not support refresh tokens").into())
    }
}

/// Grant flow selected from configuration.
#[derive(Debug)]
pub enum Grant {
    /// Interactive device authorization.
    Device(DeviceGrant),
    /// Private key JWT client credentials.
    Service(ServiceGrant),
}

impl Grant {
    /// Pick the flow implied by `credentials`.
    ///
    /// A configured private key selects [`ServiceGrant`]; otherwise the
    /// interactive [`DeviceGrant`] is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the private key cannot be used for signing.
    pub fn from_credentials(credentials: &Credentials, http: reqwest::Client) -> Result<Self> {
        match credentials.service_key() {
            Some((private_key, key_id)) => Ok(Self::Service(ServiceGrant::new(
                credentials.org_url(),
                &credentials.client_id,
                &credentials.scopes,
                private_key,
                key_id,
                http,
            )?)),
            None => Ok(Self::Device(DeviceGrant::new(
                credentials.org_url(),
                &credentials.client_id,
                &credentials.scopes,
                http,
            ))),
        }
    }
}

#[async_trait]
impl GrantStrategy for Grant {
    fn kind(&self) -> GrantKind {
        match self {
            Self::Device(grant) => grant.kind(),
            Self::Service(grant) => grant.kind(),
        }
    }

    async fn obtain_token(&self) -> Result<TokenGrant> {
        match self {
            Self::Device(grant) => grant.obtain_token().await,
            Self::Service(grant) => grant.obtain_token().await,
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        match self {
            Self::Device(grant) => grant.refresh(refresh_token).await,
            Self::Service(grant) => grant.refresh(refresh_token).await,
        }
    }
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth error response (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    fn into_rejection(self) -> AuthError {
        AuthError::rejected(self.error, self.error_description)
    }
}

/// Parsed reply from the token endpoint.
#[derive(Debug)]
pub(crate) enum TokenReply {
    /// A token was issued.
    Issued(TokenGrant),
    /// The server answered with a structured OAuth error.
    Denied(OAuthErrorBody),
}

/// POST a form and return the status and raw body.
pub(crate) async fn post_form(
    http: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<(StatusCode, String)> {
    let response = http
        .post(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

/// Interpret a token endpoint response.
///
/// Bodies that are neither a token nor an OAuth error become
/// [`Error::MalformedResponse`], whatever the status code.
pub(crate) fn parse_token_reply(status: StatusCode, body: &str) -> Result<TokenReply> {
    if status.is_success() {
        if let Ok(token) = serde_json::from_str::<TokenResponse>(body) {
            debug!(
                token_type = token.token_type.as_deref().unwrap_or("unknown"),
                expires_in = token.expires_in,
                has_refresh_token = token.refresh_token.is_some(),
                "Token issued"
            );
            let mut grant = TokenGrant::new(token.access_token);
            grant.refresh_token = token.refresh_token;
            return Ok(TokenReply::Issued(grant));
        }
    }

    if let Ok(error) = serde_json::from_str::<OAuthErrorBody>(body) {
        return Ok(TokenReply::Denied(error));
    }

    Err(Error::malformed(status.as_u16(), body))
}
