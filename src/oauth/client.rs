//! Authenticated org API clients.
//!
//! [`ClientFactory::create_client`] is the only entry point for callers that
//! need to talk to the org: it makes sure the session holds a fresh token and
//! hands back an [`OrgClient`] bound to it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::USER_AGENT;
use super::grant::{Grant, GrantStrategy};
use super::retry::RetryPolicy;
use super::session::SessionManager;
use super::storage::{self, SecretStore, ACCESS_TOKEN_KEY};
use super::token::mask_token;
use super::{AuthError, Error, Result};
use crate::config::Credentials;

/// HTTP client for the org API carrying a bearer token.
#[derive(Clone)]
pub struct OrgClient {
    http: reqwest::Client,
    org_url: Url,
    token_preview: String,
}

impl std::fmt::Debug for OrgClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgClient")
            .field("org_url", &self.org_url.as_str())
            .field("token", &self.token_preview)
            .finish()
    }
}

impl OrgClient {
    /// Create a client for `org_url` authenticating with `access_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the token cannot be sent
    /// as a header value.
    pub fn new(org_url: &str, access_token: &str, timeout: Duration) -> Result<Self> {
        let org_url = Url::parse(org_url)?;

        let mut authorization = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| Error::config("access token contains characters not allowed in a header"))?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            org_url,
            token_preview: mask_token(access_token),
        })
    }

    /// Org base URL.
    pub fn org_url(&self) -> &Url {
        &self.org_url
    }

    /// Start a request to `path`, relative to the org URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let base = self.org_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        self.http.request(method, format!("{base}/{path}"))
    }

    /// Send a request, retrying HTTP 429 responses.
    ///
    /// Uses [`RetryPolicy::rate_limited`] and honours `Retry-After`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for non-success statuses (a 401 counts as an
    /// authentication error) and [`Error::Network`] for transport failures.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.send_with(RetryPolicy::rate_limited(), request).await
    }

    /// [`OrgClient::send`] with an explicit retry policy.
    pub async fn send_with(&self, policy: RetryPolicy, request: RequestBuilder) -> Result<Response> {
        policy
            .run_if(Error::is_rate_limit, || {
                let attempt = request.try_clone();
                async move {
                    let attempt = attempt
                        .ok_or_else(|| Error::config("streaming request bodies cannot be sent"))?;
                    let response = attempt.send().await?;
                    check_status(response).await
                }
            })
            .await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let message = match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        debug!(?retry_after, "Rate limited by org API");
    }
    Err(Error::api(status.as_u16(), message, retry_after))
}

/// Produces [`OrgClient`]s bound to a valid session token.
pub struct ClientFactory<G, S> {
    session: Arc<SessionManager<G, S>>,
    org_url: String,
    http_timeout: Duration,
    max_age: Duration,
    retry: RetryPolicy,
}

impl<G, S> std::fmt::Debug for ClientFactory<G, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("org_url", &self.org_url)
            .field("http_timeout", &self.http_timeout)
            .field("max_age", &self.max_age)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ClientFactory<Grant, Arc<dyn SecretStore>> {
    /// Wire up the production stack from configuration.
    ///
    /// Selects the grant from `credentials` and the secret store from what
    /// the platform offers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the grant cannot be built, e.g. an
    /// unusable private key.
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(credentials.http_timeout)
            .build()?;

        let grant = Grant::from_credentials(credentials, http)?;
        let store = storage::detect(&credentials.keyring_service);
        let session = Arc::new(SessionManager::new(grant, store));

        Ok(Self::new(session, credentials))
    }
}

impl<G: GrantStrategy, S: SecretStore> ClientFactory<G, S> {
    /// Create a factory over an existing session.
    pub fn new(session: Arc<SessionManager<G, S>>, credentials: &Credentials) -> Self {
        Self {
            session,
            org_url: credentials.org_url().to_string(),
            http_timeout: credentials.http_timeout,
            max_age: credentials.token_max_age,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy used while creating clients.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the token freshness window.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// The shared session.
    pub fn session(&self) -> &Arc<SessionManager<G, S>> {
        &self.session
    }

    /// Create a client bound to a valid token.
    ///
    /// Connection-level failures are retried with backoff; authentication
    /// failures are returned immediately.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AuthenticationFailed`] if no token could be obtained
    /// - [`AuthError::TokenUnavailable`] if the session succeeded but the
    ///   token cannot be read back from the secret store
    #[instrument(skip(self), fields(org_url = %self.org_url))]
    pub async fn create_client(&self) -> Result<OrgClient> {
        let (client, _) = self.retry.run(|| self.try_create_client()).await?;
        Ok(client)
    }

    /// Send a request through a freshly created client.
    ///
    /// `build` receives the client and returns the request to send. If the
    /// org answers 401 while the rejected token is still the cached one,
    /// the session is invalidated so the next call renews it.
    ///
    /// # Errors
    ///
    /// Everything [`ClientFactory::create_client`] and [`OrgClient::send`]
    /// return.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: FnOnce(&OrgClient) -> RequestBuilder,
    {
        let (client, token) = self.retry.run(|| self.try_create_client()).await?;
        let result = client.send(build(&client)).await;

        if let Err(Error::Api { status: 401, .. }) = &result {
            let cached = self.session.store().get(ACCESS_TOKEN_KEY).await;
            if cached.as_deref() == Some(token.as_str()) {
                warn!(token = %mask_token(&token), "Org rejected access token, invalidating session");
                self.session.invalidate().await;
            }
        }
        result
    }

    async fn try_create_client(&self) -> Result<(OrgClient, String)> {
        self.session.ensure_valid_token(self.max_age).await?;

        let token = self
            .session
            .store()
            .get(ACCESS_TOKEN_KEY)
            .await
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::TokenUnavailable)?;

        debug!(token = %mask_token(&token), "Creating org client");
        let client = OrgClient::new(&self.org_url, &token, self.http_timeout)?;
        Ok((client, token))
    }
}
