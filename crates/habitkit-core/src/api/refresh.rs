//! Single-flight token refresh.
//!
//! When a token expires, every request in flight tends to get a 401 at
//! about the same moment. The coordinator turns those N failures into one
//! refresh call plus N replays: the first failure moves the session into
//! `Refreshing` and issues the call, later failures queue behind it, and
//! the whole queue is replayed (or rejected) once the call settles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::session::{RefreshEnd, RefreshStart};
use crate::auth::{CredentialPair, LogoutTrigger};

use super::classify::{Attempt, Dispatcher};
use super::envelope::{ApiEnvelope, TokenPayload};
use super::{ApiError, HttpResponse, RequestDescriptor};

type Reply = oneshot::Sender<Result<HttpResponse, ApiError>>;

struct PendingRequest {
    request: RequestDescriptor,
    reply: Reply,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    access_token: Option<&'a str>,
    refresh_token: &'a str,
}

enum Next {
    Wait,
    Replay(RequestDescriptor),
    Expired,
}

pub(crate) struct RefreshCoordinator {
    dispatcher: Arc<Dispatcher>,
    logout: Arc<dyn LogoutTrigger>,
    refresh_path: String,
    refresh_timeout: Duration,
    /// Callers waiting on the outstanding refresh, in arrival order.
    /// Lock order: this mutex, then the session store's.
    pending: Mutex<Vec<PendingRequest>>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        logout: Arc<dyn LogoutTrigger>,
        refresh_path: impl Into<String>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            logout,
            refresh_path: refresh_path.into(),
            refresh_timeout,
            pending: Mutex::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Recover from a first-time 401.
    ///
    /// Resolves with the replayed response once a refresh succeeds, or with
    /// [`ApiError::SessionExpired`] when it fails. The request that starts a
    /// refresh waits in the queue like every other one.
    pub(crate) async fn handle_auth_failure(
        self: &Arc<Self>,
        request: RequestDescriptor,
    ) -> Result<HttpResponse, ApiError> {
        let (reply, outcome) = oneshot::channel();

        let next = {
            let mut pending = self.lock_pending();
            let start = self.dispatcher.session.begin_refresh(request.sent_token());
            match start {
                RefreshStart::InFlight => {
                    debug!(url = %request.url, queued = pending.len() + 1, "Refresh in flight, queueing request");
                    pending.push(PendingRequest { request, reply });
                    Next::Wait
                }
                RefreshStart::Started(credentials) => {
                    info!(url = %request.url, "Access token rejected, refreshing session");
                    pending.push(PendingRequest { request, reply });
                    // Spawned so a caller dropping its future cannot strand the queue
                    let coordinator = Arc::clone(self);
                    tokio::spawn(async move { coordinator.run_refresh(credentials).await });
                    Next::Wait
                }
                RefreshStart::Superseded => Next::Replay(request),
                RefreshStart::Unavailable => Next::Expired,
            }
        };

        match next {
            Next::Wait => outcome.await.unwrap_or(Err(ApiError::SessionExpired)),
            Next::Replay(request) => {
                debug!(url = %request.url, "Token already rotated, replaying with current credentials");
                replay(&self.dispatcher, request).await
            }
            Next::Expired => {
                debug!("No refreshable session, rejecting request");
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn run_refresh(self: Arc<Self>, credentials: CredentialPair) {
        let refreshed = match tokio::time::timeout(
            self.refresh_timeout,
            self.request_new_tokens(&credentials),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };

        if let Err(ref e) = refreshed {
            warn!(error = %e, "Session refresh failed");
        }

        let (end, drained) = {
            let mut pending = self.lock_pending();
            let end = self.dispatcher.session.finish_refresh(refreshed.ok());
            (end, std::mem::take(&mut *pending))
        };

        match end {
            RefreshEnd::Refreshed | RefreshEnd::Preempted { authenticated: true } => {
                info!(replays = drained.len(), "Session refreshed, replaying queued requests");
                for entry in drained {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        let outcome = replay(&dispatcher, entry.request).await;
                        // Caller may have gone away; nothing to do then
                        let _ = entry.reply.send(outcome);
                    });
                }
            }
            RefreshEnd::Failed => {
                info!(rejected = drained.len(), "Session expired, signing out");
                self.logout.session_expired();
                reject_all(drained);
            }
            RefreshEnd::Preempted {
                authenticated: false,
            } => {
                debug!(rejected = drained.len(), "Signed out during refresh, rejecting queued requests");
                reject_all(drained);
            }
        }
    }

    async fn request_new_tokens(&self, credentials: &CredentialPair) -> Result<CredentialPair, ApiError> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or(ApiError::SessionExpired)?;

        let mut request = RequestDescriptor::post(self.refresh_path.as_str())
            .json(&RefreshBody {
                access_token: credentials.access_token.as_deref(),
                refresh_token,
            })?
            .timeout(self.refresh_timeout);
        request.decorate(&self.dispatcher.session, &self.dispatcher.exemptions);

        let response = self.dispatcher.transport.send(&request).await?;
        if !response.status.is_success() {
            return Err(ApiError::from_status(response.status, &response.text()));
        }

        let tokens = response.json::<ApiEnvelope<TokenPayload>>()?.into_result()?;
        Ok(CredentialPair {
            access_token: Some(tokens.access_token),
            // Backends that do not rotate refresh tokens omit it
            refresh_token: tokens
                .refresh_token
                .or_else(|| credentials.refresh_token.clone()),
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resend a request once with the current credentials. A 401 here is final.
async fn replay(dispatcher: &Dispatcher, mut request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
    request.retried = true;
    match dispatcher.attempt(request).await {
        Attempt::Done(outcome) => outcome,
        Attempt::AuthFailure(_) => Err(ApiError::Unauthorized),
    }
}

fn reject_all(drained: Vec<PendingRequest>) {
    for entry in drained {
        let _ = entry.reply.send(Err(ApiError::SessionExpired));
    }
}
