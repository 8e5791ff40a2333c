use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{ExemptionRegistry, SessionStore};

use super::ApiError;

/// An outgoing request, independent of the HTTP stack that will send it.
///
/// `url` is either a path relative to the configured base URL or an
/// absolute URL. `retried` flips to `true` the one time the request is
/// replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    pub retried: bool,
    /// Per-request timeout; falls back to the transport default when unset.
    pub timeout: Option<Duration>,
    /// Access token attached by the last decoration, if any.
    pub(crate) sent_token: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
            timeout: None,
            sent_token: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The bearer token this request was last sent with
    pub fn sent_token(&self) -> Option<&str> {
        self.sent_token.as_deref()
    }

    /// Attach the current access token unless the target is exempt.
    ///
    /// A missing token is not an error here; the request goes out as it
    /// is and fails downstream if the endpoint needs credentials. A bearer
    /// header from an earlier decoration is replaced or removed, and exempt
    /// targets never carry an `Authorization` header at all.
    pub fn decorate(&mut self, session: &SessionStore, exemptions: &ExemptionRegistry) {
        if self.sent_token.take().is_some() {
            self.headers.remove(header::AUTHORIZATION);
        }

        if exemptions.is_exempt(&self.url) {
            self.headers.remove(header::AUTHORIZATION);
            debug!(url = %self.url, "Exempt endpoint, sending without credentials");
            return;
        }

        let Some(token) = session.access_token() else {
            return;
        };

        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(header::AUTHORIZATION, value);
                self.sent_token = Some(token);
            }
            Err(e) => {
                warn!(error = %e, "Access token is not a valid header value, sending without it");
            }
        }
    }
}
