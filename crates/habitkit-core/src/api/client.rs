//! API client for the habitkit backend.
//!
//! [`ApiClient::send`] is the single entry point every feature issues its
//! requests through. Callers never see token refreshes: they get either
//! the eventual successful response or a terminal error, including
//! [`ApiError::SessionExpired`] once a refresh has failed.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{CredentialPair, ExemptionRegistry, LogoutTrigger, NoopLogout, SessionStore};
use crate::config::Config;

use super::classify::{Attempt, Dispatcher};
use super::envelope::{ApiEnvelope, TokenPayload};
use super::refresh::RefreshCoordinator;
use super::{ApiError, HttpResponse, ReqwestTransport, RequestDescriptor, Transport};

#[derive(Serialize)]
struct SignInBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// Authenticated API client.
/// Clone is cheap - all state is shared behind `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<RefreshCoordinator>,
    sign_in_path: String,
}

impl ApiClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Shared session store backing this client
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.dispatcher.session
    }

    pub fn exemptions(&self) -> &ExemptionRegistry {
        &self.dispatcher.exemptions
    }

    /// Send a request, transparently refreshing an expired session.
    pub async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
        match self.dispatcher.attempt(request).await {
            Attempt::Done(outcome) => outcome,
            Attempt::AuthFailure(request) => self.coordinator.handle_auth_failure(request).await,
        }
    }

    /// Send a request and unwrap the backend's `{ isSuccess, result }` envelope
    pub async fn request_json<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T, ApiError> {
        let url = request.url.clone();
        let response = self.send(request).await?;
        let envelope: ApiEnvelope<T> = response.json().map_err(|e| {
            debug!(url = %url, error = %e, "Unexpected response body");
            e
        })?;
        envelope.into_result()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json(RequestDescriptor::get(path)).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(RequestDescriptor::post(path).json(body)?).await
    }

    pub async fn put_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(RequestDescriptor::put(path).json(body)?).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request_json(RequestDescriptor::delete(path)).await
    }

    /// Sign in with email and password and store the returned token pair.
    ///
    /// The sign-in endpoint is exempt, so a 401 here means bad credentials
    /// and surfaces as [`ApiError::Unauthorized`] without any refresh.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let request = RequestDescriptor::post(self.sign_in_path.as_str())
            .json(&SignInBody { email, password })?;
        let tokens: TokenPayload = self.request_json(request).await?;

        self.session().set_authenticated(CredentialPair {
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
        });
        info!("Signed in");
        Ok(())
    }

    /// Explicit sign-out. Clears the session without firing the logout trigger.
    pub fn sign_out(&self) {
        self.session().clear();
        info!("Signed out");
    }
}

/// Builder for creating an ApiClient.
pub struct ClientBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    session: Option<Arc<SessionStore>>,
    logout: Arc<dyn LogoutTrigger>,
    refresh_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            transport: None,
            session: None,
            logout: Arc::new(NoopLogout),
            refresh_timeout: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of the reqwest one built from config
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn on_logout(mut self, logout: impl LogoutTrigger + 'static) -> Self {
        self.logout = Arc::new(logout);
        self
    }

    /// Override the configured refresh timeout
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        if self.config.endpoints.refresh.is_empty() {
            return Err(ApiError::Config("refresh endpoint is required".to_string()));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::with_timeout(
                self.config.base_url.as_str(),
                self.config.request_timeout(),
            )?),
        };

        let dispatcher = Arc::new(Dispatcher {
            transport,
            session: self.session.unwrap_or_default(),
            exemptions: self.config.exemptions(),
        });

        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&dispatcher),
            self.logout,
            self.config.endpoints.refresh.as_str(),
            self.refresh_timeout
                .unwrap_or_else(|| self.config.refresh_timeout()),
        ));

        Ok(ApiClient {
            dispatcher,
            coordinator,
            sign_in_path: self.config.endpoints.sign_in,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
