//! Core library for habitkit.
//!
//! Provides the authenticated API client used by every habitkit front end:
//! session storage, bearer-token decoration, 401 classification and
//! single-flight token refresh with replay.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, HttpResponse, RequestDescriptor, Transport};
pub use auth::{CredentialPair, LogoutTrigger, SessionStatus, SessionStore};
pub use config::Config;
