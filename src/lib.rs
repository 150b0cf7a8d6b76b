//! okta-session - authenticated-session manager for the Okta management API
//!
//! Obtains, caches, and renews an OAuth 2.0 access token through the device
//! authorization grant or a private key JWT service grant, and hands out
//! API clients bound to it.

pub mod config;
pub mod logging;
pub mod oauth;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
