//! End-to-end checks of the refresh flow over real HTTP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use habitkit_core::{ApiClient, ApiError, Config, CredentialPair, RequestDescriptor, SessionStatus};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client_for(server: &MockServer, logouts: &Arc<AtomicUsize>) -> ApiClient {
    let config = Config {
        base_url: server.uri(),
        ..Config::default()
    };
    let counter = Arc::clone(logouts);
    let client = ApiClient::builder()
        .config(config)
        .on_logout(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    client
        .session()
        .set_authenticated(CredentialPair::new("T1", "R1"));
    client
}

#[tokio::test]
async fn test_parallel_requests_refresh_once_and_replay_with_new_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "accessToken": "T1", "refreshToken": "R1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSuccess": true,
            "result": { "accessToken": "T2", "refreshToken": "R2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let paths = ["/routines", "/rankings", "/shop/items"];
    for p in paths {
        Mock::given(method("GET"))
            .and(path(p))
            .and(header("authorization", "Bearer T1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(p))
            .and(header("authorization", "Bearer T2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isSuccess": true,
                "result": { "path": p }
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let logouts = Arc::new(AtomicUsize::new(0));
    let client = client_for(&server, &logouts);

    let results = join_all(paths.iter().map(|p| client.get_json::<serde_json::Value>(p))).await;
    for (p, result) in paths.iter().zip(results) {
        assert_eq!(result.unwrap()["path"], *p);
    }

    let snapshot = client.session().get();
    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert_eq!(snapshot.credentials, CredentialPair::new("T2", "R2"));
    assert_eq!(logouts.load(Ordering::SeqCst), 0);

    server.verify().await;
}

#[tokio::test]
async fn test_rejected_refresh_expires_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isSuccess": false,
            "code": 2012,
            "message": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let logouts = Arc::new(AtomicUsize::new(0));
    let client = client_for(&server, &logouts);

    let results = join_all(
        ["/routines", "/rankings"]
            .iter()
            .map(|p| client.send(RequestDescriptor::get(*p))),
    )
    .await;
    for result in results {
        assert!(matches!(result, Err(ApiError::SessionExpired)));
    }
    assert_eq!(logouts.load(Ordering::SeqCst), 1);
    assert_eq!(client.session().status(), SessionStatus::Unauthenticated);

    server.verify().await;
}

#[tokio::test]
async fn test_sign_in_is_sent_without_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users/sign-in"))
        .and(|req: &Request| !req.headers.contains_key("authorization"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let logouts = Arc::new(AtomicUsize::new(0));
    let client = client_for(&server, &logouts);

    let result = client.sign_in("kim@example.com", "wrong").await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert_eq!(logouts.load(Ordering::SeqCst), 0);

    server.verify().await;
}
