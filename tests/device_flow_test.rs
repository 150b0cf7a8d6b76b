mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use okta_session::oauth::{
    AuthError, DeviceAuthorizationTicket, DeviceGrant, Error, GrantStrategy,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    device_authorization_body, form, oauth_error, CountingPresenter, FormParam,
    DEVICE_AUTHORIZE_PATH, DEVICE_CODE_GRANT, TOKEN_PATH,
};

fn device_grant(server: &MockServer, presenter: &CountingPresenter) -> DeviceGrant {
    DeviceGrant::new(
        &server.uri(),
        "client-123",
        &["okta.users.read".to_string()],
        reqwest::Client::new(),
    )
    .with_presenter(Arc::new(presenter.clone()))
}

fn ticket(poll_interval: Duration, expires_in: chrono::Duration) -> DeviceAuthorizationTicket {
    DeviceAuthorizationTicket {
        device_code: "device-code-1".into(),
        user_code: "WDJB-MJHT".into(),
        verification_url: "https://example.okta.com/activate".into(),
        poll_interval,
        expires_at: Utc::now() + expires_in,
    }
}

#[tokio::test]
async fn test_initiate_presents_ticket_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_AUTHORIZE_PATH))
        .and(FormParam("client_id", "client-123"))
        .and(FormParam("scope", "okta.users.read offline_access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_authorization_body()))
        .expect(1)
        .mount(&server)
        .await;

    let presenter = CountingPresenter::default();
    let grant = device_grant(&server, &presenter);

    let ticket = grant.initiate().await.unwrap();

    assert_eq!(presenter.count(), 1);
    assert_eq!(ticket.device_code, "device-code-1");
    assert_eq!(ticket.user_code, "WDJB-MJHT");
    assert_eq!(
        ticket.verification_url,
        "https://example.okta.com/activate?user_code=WDJB-MJHT"
    );
    let remaining = ticket.expires_at - Utc::now();
    assert!(remaining > chrono::Duration::seconds(590));
    assert!(remaining <= chrono::Duration::seconds(600));
}

#[tokio::test]
async fn test_initiate_html_response_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_AUTHORIZE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Error</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let presenter = CountingPresenter::default();
    let err = device_grant(&server, &presenter).initiate().await.unwrap_err();

    match err {
        Error::MalformedResponse { status, body } => {
            assert_eq!(status, 200);
            assert_eq!(body, "<html>Error</html>");
        }
        other => panic!("expected malformed response, got {other:?}"),
    }
    assert_eq!(presenter.count(), 0);
}

#[tokio::test]
async fn test_initiate_rejected_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_AUTHORIZE_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(oauth_error("invalid_client")))
        .mount(&server)
        .await;

    let presenter = CountingPresenter::default();
    let err = device_grant(&server, &presenter).initiate().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Auth(AuthError::Rejected { ref error, .. }) if error == "invalid_client"
    ));
}

#[tokio::test]
async fn test_initiate_unreachable_server_is_network_error() {
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let grant = DeviceGrant::new(&uri, "client-123", &[], reqwest::Client::new())
        .with_presenter(Arc::new(CountingPresenter::default()));
    let err = grant.initiate().await.unwrap_err();

    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_poll_tolerates_malformed_and_pending_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(oauth_error("authorization_pending")),
        )
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(FormParam("grant_type", DEVICE_CODE_GRANT))
        .and(FormParam("device_code", "device-code-1"))
        .and(FormParam("client_id", "client-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .with_priority(3)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let token = grant
        .poll(&ticket(Duration::from_millis(10), chrono::Duration::seconds(30)))
        .await
        .unwrap();

    assert_eq!(token.access_token, "access-1");
    assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_poll_expired_ticket_sends_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "never"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let err = grant
        .poll(&ticket(Duration::from_millis(10), chrono::Duration::seconds(-1)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
}

#[tokio::test]
async fn test_poll_stops_at_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(oauth_error("authorization_pending")),
        )
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let err = grant
        .poll(&ticket(
            Duration::from_millis(50),
            chrono::Duration::milliseconds(300),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
    let requests = server.received_requests().await.unwrap().len();
    assert!((1..=6).contains(&requests), "unexpected request count {requests}");
}

#[tokio::test]
async fn test_poll_wait_never_passes_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "never"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let started = Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        grant.poll(&ticket(Duration::from_secs(30), chrono::Duration::seconds(1))),
    )
    .await
    .expect("poll should give up at the deadline")
    .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_poll_repeated_slow_down_near_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(oauth_error("slow_down")))
        .expect(1)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        grant.poll(&ticket(
            Duration::from_millis(10),
            chrono::Duration::milliseconds(1500),
        )),
    )
    .await
    .expect("poll should give up at the deadline")
    .unwrap_err();

    // The widened interval overshoots the deadline, so no second request.
    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
}

#[tokio::test]
async fn test_poll_survives_dropped_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        }
    });

    let grant = DeviceGrant::new(
        &format!("http://{addr}"),
        "client-123",
        &[],
        reqwest::Client::builder().no_proxy().build().unwrap(),
    )
    .with_presenter(Arc::new(CountingPresenter::default()));

    let err = grant
        .poll(&ticket(Duration::from_millis(50), chrono::Duration::seconds(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
    let seen = connections.load(Ordering::SeqCst);
    assert!(seen >= 2, "polling stopped after {seen} connection(s)");
}

#[tokio::test]
async fn test_initiate_rejects_out_of_range_lifetime() {
    for expires_in in [serde_json::json!(100_000_000_000_000_000u64), serde_json::json!(u64::MAX)] {
        let server = MockServer::start().await;
        let mut body = device_authorization_body();
        body["expires_in"] = expires_in;
        Mock::given(method("POST"))
            .and(path(DEVICE_AUTHORIZE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let presenter = CountingPresenter::default();
        let err = device_grant(&server, &presenter).initiate().await.unwrap_err();

        assert!(matches!(err, Error::MalformedResponse { status: 200, .. }));
        assert_eq!(presenter.count(), 0);
    }
}

#[tokio::test]
async fn test_huge_server_interval_is_bounded_by_lifetime() {
    let server = MockServer::start().await;
    let mut body = device_authorization_body();
    body["expires_in"] = serde_json::json!(1);
    body["interval"] = serde_json::json!(u64::MAX);
    Mock::given(method("POST"))
        .and(path(DEVICE_AUTHORIZE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "never"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let presenter = CountingPresenter::default();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        device_grant(&server, &presenter).obtain_token(),
    )
    .await
    .expect("flow should end when the device code lapses")
    .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
    assert_eq!(presenter.count(), 1);
}

#[tokio::test]
async fn test_poll_access_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(oauth_error("access_denied")))
        .expect(1)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let err = grant
        .poll(&ticket(Duration::from_millis(10), chrono::Duration::seconds(30)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::AccessDenied)));
}

#[tokio::test]
async fn test_poll_server_reported_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(oauth_error("expired_token")))
        .expect(1)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let err = grant
        .poll(&ticket(Duration::from_millis(10), chrono::Duration::seconds(30)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::DeviceCodeExpired)));
}

#[tokio::test]
async fn test_obtain_token_runs_full_flow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEVICE_AUTHORIZE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_authorization_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(FormParam("grant_type", DEVICE_CODE_GRANT))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let presenter = CountingPresenter::default();
    let token = device_grant(&server, &presenter).obtain_token().await.unwrap();

    assert_eq!(token.access_token, "access-1");
    assert_eq!(presenter.count(), 1);
}

#[tokio::test]
async fn test_refresh_keeps_unrotated_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(FormParam("grant_type", "refresh_token"))
        .and(FormParam("refresh_token", "refresh-1"))
        .and(FormParam("client_id", "client-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-2",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let token = grant.refresh("refresh-1").await.unwrap();

    assert_eq!(token.access_token, "access-2");
    assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));

    // A refresh keeps the scopes of the original grant.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(form(&requests[0]).get("scope"), None);
}

#[tokio::test]
async fn test_refresh_invalid_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(oauth_error("invalid_grant")))
        .mount(&server)
        .await;

    let grant = device_grant(&server, &CountingPresenter::default());
    let err = grant.refresh("revoked").await.unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::InvalidGrant)));
}
