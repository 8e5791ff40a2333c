//! Scripted in-process backend for exercising the request pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header;
use reqwest::StatusCode;
use serde_json::json;

use super::{ApiError, HttpResponse, RequestDescriptor, Transport};

pub(crate) const REFRESH_PATH: &str = "/auth/refresh";
pub(crate) const SIGN_IN_PATH: &str = "/users/sign-in";
pub(crate) const PASSWORD: &str = "hunter2";

/// How the fake backend answers the refresh endpoint
#[derive(Debug, Clone)]
pub(crate) enum RefreshMode {
    /// Rotate to this pair (refresh token optional)
    Rotate {
        access: String,
        refresh: Option<String>,
    },
    /// 200 with `isSuccess: false`
    Reject,
    /// 500
    ServerError,
    /// Never answers
    Hang,
    /// Connection-level failure
    NetworkError,
}

impl RefreshMode {
    pub(crate) fn rotate(access: &str, refresh: &str) -> Self {
        RefreshMode::Rotate {
            access: access.to_string(),
            refresh: Some(refresh.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub url: String,
    pub authorization: Option<String>,
    pub retried: bool,
    pub body: Option<serde_json::Value>,
}

/// Accepts exactly one bearer token at a time; anything else gets a 401.
///
/// `/always-401` rejects every request and `/boom` always fails with 500.
pub(crate) struct FakeBackend {
    valid_token: Mutex<String>,
    log: Mutex<Vec<Recorded>>,
    refresh_calls: AtomicUsize,
    mode: RefreshMode,
}

impl FakeBackend {
    pub(crate) fn new(valid_token: &str, mode: RefreshMode) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(valid_token.to_string()),
            log: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            mode,
        })
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, url: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }

    pub(crate) fn set_valid_token(&self, token: &str) {
        *self.valid_token.lock().unwrap() = token.to_string();
    }

    fn ok(result: serde_json::Value) -> HttpResponse {
        HttpResponse::json_body(StatusCode::OK, &json!({ "isSuccess": true, "result": result }))
    }

    fn unauthorized() -> HttpResponse {
        HttpResponse::new(StatusCode::UNAUTHORIZED, r#"{"message":"token expired"}"#)
    }

    fn answer_refresh(&self) -> Option<Result<HttpResponse, ApiError>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let answer = match &self.mode {
            RefreshMode::Rotate { access, refresh } => {
                self.set_valid_token(access);
                Ok(Self::ok(json!({ "accessToken": access, "refreshToken": refresh })))
            }
            RefreshMode::Reject => Ok(HttpResponse::json_body(
                StatusCode::OK,
                &json!({ "isSuccess": false, "code": 2012, "message": "invalid refresh token" }),
            )),
            RefreshMode::ServerError => Ok(HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "down")),
            RefreshMode::NetworkError => Err(ApiError::Network("connection reset".to_string())),
            RefreshMode::Hang => return None,
        };
        Some(answer)
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, ApiError> {
        let authorization = request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.log.lock().unwrap().push(Recorded {
            url: request.url.clone(),
            authorization: authorization.clone(),
            retried: request.retried,
            body: request.body.clone(),
        });

        // Stand-in for network latency
        tokio::task::yield_now().await;

        match request.url.as_str() {
            REFRESH_PATH => match self.answer_refresh() {
                Some(answer) => answer,
                None => std::future::pending().await,
            },
            SIGN_IN_PATH => {
                let password = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("password"))
                    .and_then(|p| p.as_str());
                if password == Some(PASSWORD) {
                    self.set_valid_token("signed-in");
                    Ok(Self::ok(json!({ "accessToken": "signed-in", "refreshToken": "signed-in-r" })))
                } else {
                    Ok(Self::unauthorized())
                }
            }
            "/always-401" => Ok(Self::unauthorized()),
            "/boom" => Ok(HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
            url => {
                let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
                if authorization.as_deref() == Some(expected.as_str()) {
                    Ok(Self::ok(json!({ "path": url })))
                } else {
                    Ok(Self::unauthorized())
                }
            }
        }
    }
}
