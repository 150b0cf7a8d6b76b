//! Protocol constants for the Okta authorization server.
//!
//! These constants define the endpoint paths, grant identifiers, and
//! timing defaults used by the device and service grant flows.

use std::time::Duration;

// =============================================================================
// Endpoint Paths (relative to the org URL)
// =============================================================================

/// Device authorization endpoint (RFC 8628 section 3.1).
pub const DEVICE_AUTHORIZE_PATH: &str = "/oauth2/v1/device/authorize";

/// Token endpoint for every grant.
pub const TOKEN_PATH: &str = "/oauth2/v1/token";

// =============================================================================
// Grant Identifiers
// =============================================================================

/// Grant type for device code token exchange (RFC 8628).
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Grant type for refreshing an access token.
pub const REFRESH_TOKEN_GRANT_TYPE: &str = "refresh_token";

/// Grant type for the service (private key JWT) flow.
pub const CLIENT_CREDENTIALS_GRANT_TYPE: &str = "client_credentials";

/// Assertion type for private key JWT client authentication (RFC 7523).
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Scope that makes the authorization server issue a refresh token.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["okta.users.read", "okta.groups.read"];

// =============================================================================
// OAuth Error Codes
// =============================================================================

/// User has not completed authorization yet.
pub const ERROR_AUTHORIZATION_PENDING: &str = "authorization_pending";

/// Client is polling too quickly.
pub const ERROR_SLOW_DOWN: &str = "slow_down";

/// User explicitly denied the request.
pub const ERROR_ACCESS_DENIED: &str = "access_denied";

/// Device code has expired.
pub const ERROR_EXPIRED_TOKEN: &str = "expired_token";

/// Refresh token is invalid, expired, or revoked.
pub const ERROR_INVALID_GRANT: &str = "invalid_grant";

// =============================================================================
// Timing
// =============================================================================

/// Default polling interval in seconds (per RFC 8628, minimum is 5).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Seconds added to the polling interval after a `slow_down` response.
pub const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// Lifetime of a signed client assertion, in seconds.
pub const ASSERTION_LIFETIME_SECS: i64 = 300;

/// Default freshness window for cached tokens.
///
/// Okta access tokens live for one hour; renewing five minutes early keeps
/// in-flight requests from racing the server-side expiry.
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(55 * 60);

/// Default HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Storage
// =============================================================================

/// Default keyring service name for cached secrets.
pub const DEFAULT_KEYRING_SERVICE: &str = "okta-mcp-server";

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("okta-session/", env!("CARGO_PKG_VERSION"));
