//! Shared helpers for integration tests against a mock authorization server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use okta_session::oauth::{DeviceAuthorizationTicket, VerificationPresenter};
use wiremock::{Match, Request};

pub const PRIVATE_KEY: &str = include_str!("../fixtures/service_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/service_key.pub.pem");

pub const DEVICE_AUTHORIZE_PATH: &str = "/oauth2/v1/device/authorize";
pub const TOKEN_PATH: &str = "/oauth2/v1/token";

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Decode a form-encoded request body.
pub fn form(request: &Request) -> HashMap<String, String> {
    url::form_urlencoded::parse(&request.body)
        .into_owned()
        .collect()
}

/// Matches requests whose form body has `key=value`.
pub struct FormParam(pub &'static str, pub &'static str);

impl Match for FormParam {
    fn matches(&self, request: &Request) -> bool {
        form(request).get(self.0).map(String::as_str) == Some(self.1)
    }
}

/// Presenter that counts how often it was asked to show a ticket.
#[derive(Clone, Default)]
pub struct CountingPresenter {
    count: Arc<AtomicUsize>,
}

impl CountingPresenter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl VerificationPresenter for CountingPresenter {
    fn present(&self, _ticket: &DeviceAuthorizationTicket) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Device authorization response with an immediate polling interval.
pub fn device_authorization_body() -> serde_json::Value {
    serde_json::json!({
        "device_code": "device-code-1",
        "user_code": "WDJB-MJHT",
        "verification_uri": "https://example.okta.com/activate",
        "verification_uri_complete": "https://example.okta.com/activate?user_code=WDJB-MJHT",
        "expires_in": 600,
        "interval": 0
    })
}

pub fn oauth_error(error: &str) -> serde_json::Value {
    serde_json::json!({ "error": error, "error_description": format!("{error} description") })
}
