//! Session state and sign-in credentials.
//!
//! This module provides:
//! - `SessionStore`: the current access/refresh token pair and session status
//! - `ExemptionRegistry`: endpoints that are sent without an access token
//! - `LogoutTrigger`: the hook fired when a session cannot be refreshed
//! - `CredentialStore`: remembered sign-in passwords via the OS keyring

pub mod credentials;
pub mod exempt;
pub mod logout;
pub mod session;

pub use credentials::CredentialStore;
pub use exempt::ExemptionRegistry;
pub use logout::{LogoutTrigger, NoopLogout};
pub use session::{CredentialPair, PersistedSession, SessionSnapshot, SessionStatus, SessionStore};
