//! Client credentials grant authenticated with a private key JWT.
//!
//! Every token request carries a freshly signed assertion (RFC 7523) with
//! `iss = sub = client_id`, `aud` set to the token endpoint, and a unique
//! `jti`. Assertions are never cached. No refresh token is issued, so a stale
//! session simply mints a new token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{parse_token_reply, post_form, GrantStrategy, TokenReply};
use crate::oauth::constants::{
    ASSERTION_LIFETIME_SECS, CLIENT_CREDENTIALS_GRANT_TYPE, JWT_BEARER_ASSERTION_TYPE, TOKEN_PATH,
};
use crate::oauth::token::{mask_token, GrantKind, TokenGrant};
use crate::oauth::{Error, Result};

/// Claims of a client assertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    /// Issuer (client id).
    pub iss: String,
    /// Subject (client id).
    pub sub: String,
    /// Audience (token endpoint URL).
    pub aud: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
    /// Unique assertion id.
    pub jti: String,
}

/// Non-interactive grant using a registered RSA key.
pub struct ServiceGrant {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    key_id: String,
    scope: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for ServiceGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceGrant")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("key_id", &self.key_id)
            .field("scope", &self.scope)
            .field("encoding_key", &"[REDACTED]")
            .finish()
    }
}

impl ServiceGrant {
    /// Create a service grant.
    ///
    /// The key is checked by signing a throwaway assertion, so an unusable
    /// key fails here rather than on the first token request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `private_key_pem` is not an RSA private
    /// key in PEM form (PKCS#1 or PKCS#8) or cannot sign.
    pub fn new(
        org_url: &str,
        client_id: &str,
        scopes: &[String],
        private_key_pem: &str,
        key_id: &str,
        http: reqwest::Client,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| Error::config(format!("Invalid OKTA_PRIVATE_KEY: {e}")))?;

        let grant = Self {
            http,
            token_url: format!("{org_url}{TOKEN_PATH}"),
            client_id: client_id.to_string(),
            key_id: key_id.to_string(),
            scope: scopes.join(" "),
            encoding_key,
        };

        grant
            .sign_assertion(Utc::now())
            .map_err(|e| Error::config(format!("OKTA_PRIVATE_KEY cannot sign assertions: {e}")))?;

        Ok(grant)
    }

    /// Token endpoint URL, which is also the assertion audience.
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Claims for an assertion issued at `now`.
    #[must_use]
    pub fn claims_at(&self, now: DateTime<Utc>) -> AssertionClaims {
        let iat = now.timestamp();
        AssertionClaims {
            iss: self.client_id.clone(),
            sub: self.client_id.clone(),
            aud: self.token_url.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Sign a new client assertion issued at `now`.
    pub fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());

        encode(&header, &self.claims_at(now), &self.encoding_key)
            .map_err(|e| Error::config(format!("Failed to sign client assertion: {e}")))
    }
}

#[async_trait]
impl GrantStrategy for ServiceGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::Service
    }

    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn obtain_token(&self) -> Result<TokenGrant> {
        info!("Requesting service token");

        let assertion = self.sign_assertion(Utc::now())?;
        let (status, body) = post_form(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", CLIENT_CREDENTIALS_GRANT_TYPE),
                ("scope", self.scope.as_str()),
                ("client_assertion_type", JWT_BEARER_ASSERTION_TYPE),
                ("client_assertion", assertion.as_str()),
            ],
        )
        .await?;

        match parse_token_reply(status, &body)? {
            TokenReply::Issued(grant) => {
                info!(token_preview = %mask_token(&grant.access_token), "Service token issued");
                // The client credentials grant never refreshes.
                Ok(TokenGrant::new(grant.access_token))
            }
            TokenReply::Denied(error) => {
                warn!(status = status.as_u16(), error = %error.error, "Service token request rejected");
                Err(error.into_rejection().into())
            }
        }
    }
}
