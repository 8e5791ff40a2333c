use std::sync::Arc;

use reqwest::StatusCode;
use tracing::debug;

use crate::auth::{ExemptionRegistry, SessionStore};

use super::{ApiError, HttpResponse, RequestDescriptor, Transport};

/// What to do with a completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Hand the response to the caller unchanged.
    Success,
    /// First-time 401 on a protected endpoint; recoverable by refreshing.
    AuthFailure,
    /// Propagate as an error, never retried here.
    TerminalFailure,
}

/// Classify a response (or transport error) against the request that produced it.
///
/// Only a 401 on a request that has not been replayed yet, aimed at a
/// non-exempt endpoint, is eligible for refresh. A second 401 after a
/// replay, or a 401 from sign-in, is terminal; that is what keeps the
/// retry loop bounded.
pub fn classify(
    request: &RequestDescriptor,
    outcome: &Result<HttpResponse, ApiError>,
    exemptions: &ExemptionRegistry,
) -> Classification {
    let response = match outcome {
        Ok(response) => response,
        Err(_) => return Classification::TerminalFailure,
    };

    if response.status.is_success() {
        Classification::Success
    } else if response.status == StatusCode::UNAUTHORIZED
        && !request.retried
        && !exemptions.is_exempt(&request.url)
    {
        Classification::AuthFailure
    } else {
        Classification::TerminalFailure
    }
}

/// Turn a terminal outcome into the caller-facing error
pub(crate) fn into_error(outcome: Result<HttpResponse, ApiError>) -> ApiError {
    match outcome {
        Ok(response) => ApiError::from_status(response.status, &response.text()),
        Err(e) => e,
    }
}

/// Outcome of a single decorate-send-classify pass
pub(crate) enum Attempt {
    Done(Result<HttpResponse, ApiError>),
    AuthFailure(RequestDescriptor),
}

/// One decorate-send-classify pass, shared by first sends and replays.
pub(crate) struct Dispatcher {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: Arc<SessionStore>,
    pub(crate) exemptions: ExemptionRegistry,
}

impl Dispatcher {
    pub(crate) async fn attempt(&self, mut request: RequestDescriptor) -> Attempt {
        request.decorate(&self.session, &self.exemptions);
        let outcome = self.transport.send(&request).await;

        match classify(&request, &outcome, &self.exemptions) {
            Classification::Success => Attempt::Done(outcome),
            Classification::AuthFailure => {
                debug!(url = %request.url, "Authentication failure, handing to refresh coordinator");
                Attempt::AuthFailure(request)
            }
            Classification::TerminalFailure => Attempt::Done(Err(into_error(outcome))),
        }
    }
}
