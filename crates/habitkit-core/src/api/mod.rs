//! REST API client module for the habitkit backend.
//!
//! Requests flow through one pipeline: the request is decorated with the
//! current access token, sent over a [`Transport`], and the result is
//! classified. A first-time 401 is handed to the refresh coordinator,
//! which refreshes the session once and replays every request that was
//! waiting on it.

pub mod classify;
pub mod client;
pub mod envelope;
pub mod error;
mod refresh;
pub mod request;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{classify, Classification};
pub use client::{ApiClient, ClientBuilder};
pub use envelope::ApiEnvelope;
pub use error::ApiError;
pub use request::RequestDescriptor;
pub use transport::{HttpResponse, ReqwestTransport, Transport};
