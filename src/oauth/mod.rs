//! # Authenticated Session Management
//!
//! Obtains, caches, refreshes, and shares an Okta OAuth 2.0 access token
//! across many concurrent callers.
//!
//! ## Core Types
//!
//! - [`ClientFactory`] - hands out [`OrgClient`]s bound to a valid token
//! - [`SessionManager`] - freshness checks and serialized renewal
//! - [`Session`] - the cached token state
//! - [`Error`] / [`AuthError`] - error taxonomy
//!
//! ## Grant Flows
//!
//! - [`DeviceGrant`] - interactive device authorization with refresh tokens
//! - [`ServiceGrant`] - private key JWT client credentials
//!
//! ## Storage Backends
//!
//! - [`storage::FallbackSecretStore`] over [`storage::KeyringBackend`] -
//!   OS keyring with in-memory fallback (feature-gated)
//! - [`MemorySecretStore`] - in-process only
//!
//! ## Security
//!
//! - Tokens are only ever logged masked ([`mask_token`])
//! - All implementations are thread-safe (`Send + Sync`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use okta_session::config::Credentials;
//! use okta_session::oauth::ClientFactory;
//!
//! # async fn example() -> okta_session::oauth::Result<()> {
//! let credentials = Credentials::load()?;
//! let factory = ClientFactory::from_credentials(&credentials)?;
//!
//! let client = factory.create_client().await?;
//! let request = client.request(reqwest::Method::GET, "/api/v1/users?limit=1");
//! let users = client.send(request).await?;
//! # let _ = users;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod grant;
mod retry;
mod session;
pub mod storage;
mod token;

pub use client::{ClientFactory, OrgClient};
pub use error::{AuthError, Error, Result};
pub use grant::{
    BrowserPresenter, DeviceAuthorizationTicket, DeviceGrant, Grant, GrantStrategy, ServiceGrant,
    VerificationPresenter,
};
pub use retry::RetryPolicy;
pub use session::{SessionManager, SessionPhase, SessionSnapshot};
pub use storage::{MemorySecretStore, SecretStore};
pub use token::{mask_token, GrantKind, Session, TokenGrant};
