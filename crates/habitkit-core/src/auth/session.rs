use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Access + refresh token pair. Replaced whole, never patched field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated,
    Refreshing,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub credentials: CredentialPair,
    pub status: SessionStatus,
}

/// On-disk form of the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub saved_at: DateTime<Utc>,
}

/// Result of trying to move the store into `Refreshing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefreshStart {
    /// This caller owns the refresh and must issue it with these credentials.
    Started(CredentialPair),
    /// A refresh is already outstanding.
    InFlight,
    /// The failing request carried a token that has since been rotated.
    Superseded,
    /// Nothing to refresh with.
    Unavailable,
}

/// How an outstanding refresh settled the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshEnd {
    /// New credentials stored; status is `Authenticated`.
    Refreshed,
    /// Refresh failed; the store was cleared.
    Failed,
    /// Sign-in or sign-out replaced the session while the refresh was out.
    /// The refresh result is discarded and the current session wins.
    Preempted { authenticated: bool },
}

#[derive(Debug)]
struct SessionState {
    credentials: CredentialPair,
    status: SessionStatus,
}

/// Shared holder of the current credentials and session status.
///
/// All operations are synchronous; the lock is never held across an await.
/// When created with [`SessionStore::persistent`] every change is written
/// through to a JSON file so the session survives restarts.
#[derive(Debug)]
pub struct SessionStore {
    state: Mutex<SessionState>,
    persist_path: Option<PathBuf>,
}

impl SessionStore {
    /// Empty, unauthenticated store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(SessionState {
                credentials: CredentialPair::default(),
                status: SessionStatus::Unauthenticated,
            }),
            persist_path: None,
        }
    }

    /// Store backed by a session file, restored from it when present
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            persist_path: Some(path.clone()),
            ..Self::in_memory()
        };

        if let Some(saved) = Self::load(&path)? {
            let pair = CredentialPair {
                access_token: saved.access_token,
                refresh_token: saved.refresh_token,
            };
            debug!(saved_at = %saved.saved_at, "Session restored from disk");
            let mut state = store.lock();
            state.status = Self::status_for(&pair);
            state.credentials = pair;
        }

        Ok(store)
    }

    /// Like [`SessionStore::persistent`], but an unreadable session file is
    /// discarded and the store starts signed out on the same path.
    pub fn persistent_or_reset(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::persistent(&path) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Discarding unreadable session file");
                if let Err(e) = Self::remove(&path) {
                    warn!(error = %e, "Failed to remove session file");
                }
                Self {
                    persist_path: Some(path),
                    ..Self::in_memory()
                }
            }
        }
    }

    pub fn get(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            credentials: state.credentials.clone(),
            status: state.status,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().credentials.access_token.clone()
    }

    /// Replace the credentials. A pair without an access token leaves the
    /// session unauthenticated.
    pub fn set_authenticated(&self, pair: CredentialPair) {
        let status = Self::status_for(&pair);
        if status == SessionStatus::Unauthenticated {
            warn!("Credential pair has no access token, session stays unauthenticated");
        }
        let mut state = self.lock();
        self.persist(Some(&pair));
        state.credentials = pair;
        state.status = status;
    }

    /// Discard both tokens and drop to `Unauthenticated`
    pub fn clear(&self) {
        let mut state = self.lock();
        self.persist(None);
        state.credentials = CredentialPair::default();
        state.status = SessionStatus::Unauthenticated;
    }

    /// Atomically check the status and, when allowed, enter `Refreshing`.
    ///
    /// `sent_token` is the access token the failing request was decorated with.
    pub(crate) fn begin_refresh(&self, sent_token: Option<&str>) -> RefreshStart {
        let mut state = self.lock();
        match state.status {
            SessionStatus::Refreshing => RefreshStart::InFlight,
            SessionStatus::Unauthenticated => RefreshStart::Unavailable,
            SessionStatus::Authenticated => {
                if state.credentials.access_token.as_deref() != sent_token {
                    return RefreshStart::Superseded;
                }
                if state.credentials.refresh_token.is_none() {
                    return RefreshStart::Unavailable;
                }
                state.status = SessionStatus::Refreshing;
                RefreshStart::Started(state.credentials.clone())
            }
        }
    }

    /// Leave `Refreshing`, storing `refreshed` or clearing the session.
    pub(crate) fn finish_refresh(&self, refreshed: Option<CredentialPair>) -> RefreshEnd {
        let mut state = self.lock();
        if state.status != SessionStatus::Refreshing {
            return RefreshEnd::Preempted {
                authenticated: state.status == SessionStatus::Authenticated,
            };
        }
        match refreshed {
            Some(pair) if pair.access_token.is_some() => {
                self.persist(Some(&pair));
                state.credentials = pair;
                state.status = SessionStatus::Authenticated;
                RefreshEnd::Refreshed
            }
            _ => {
                self.persist(None);
                state.credentials = CredentialPair::default();
                state.status = SessionStatus::Unauthenticated;
                RefreshEnd::Failed
            }
        }
    }

    fn status_for(pair: &CredentialPair) -> SessionStatus {
        if pair.access_token.is_some() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Unauthenticated
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(path: &Path) -> Result<Option<PersistedSession>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read session file")?;
        let saved: PersistedSession =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(saved))
    }

    fn persist(&self, pair: Option<&CredentialPair>) {
        let Some(ref path) = self.persist_path else {
            return;
        };
        let result = match pair {
            Some(pair) => Self::save(path, pair),
            None => Self::remove(path),
        };
        if let Err(e) = result {
            warn!(error = %e, path = %path.display(), "Failed to persist session");
        }
    }

    fn save(path: &Path, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let saved = PersistedSession {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&saved)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_store_is_unauthenticated() {
        let store = SessionStore::in_memory();
        let snapshot = store.get();
        assert_eq!(snapshot.status, SessionStatus::Unauthenticated);
        assert_eq!(snapshot.credentials, CredentialPair::default());
    }

    #[test]
    fn test_set_authenticated_and_clear() {
        let store = SessionStore::in_memory();
        store.set_authenticated(CredentialPair::new("a1", "r1"));
        assert_eq!(store.status(), SessionStatus::Authenticated);
        assert_eq!(store.access_token().as_deref(), Some("a1"));

        store.clear();
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert_eq!(store.access_token(), None);
        assert_eq!(store.get().credentials.refresh_token, None);
    }

    #[test]
    fn test_pair_without_access_token_is_not_authenticated() {
        let store = SessionStore::in_memory();
        store.set_authenticated(CredentialPair {
            access_token: None,
            refresh_token: Some("r1".to_string()),
        });
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn test_begin_refresh_transitions() {
        let store = SessionStore::in_memory();
        assert_eq!(store.begin_refresh(None), RefreshStart::Unavailable);

        store.set_authenticated(CredentialPair::new("a1", "r1"));
        assert_eq!(store.begin_refresh(Some("old")), RefreshStart::Superseded);
        assert_eq!(store.status(), SessionStatus::Authenticated);

        assert_eq!(
            store.begin_refresh(Some("a1")),
            RefreshStart::Started(CredentialPair::new("a1", "r1"))
        );
        assert_eq!(store.status(), SessionStatus::Refreshing);
        assert_eq!(store.begin_refresh(Some("a1")), RefreshStart::InFlight);
    }

    #[test]
    fn test_finish_refresh() {
        let store = SessionStore::in_memory();
        store.set_authenticated(CredentialPair::new("a1", "r1"));
        store.begin_refresh(Some("a1"));
        assert_eq!(
            store.finish_refresh(Some(CredentialPair::new("a2", "r2"))),
            RefreshEnd::Refreshed
        );
        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.status(), SessionStatus::Authenticated);

        store.begin_refresh(Some("a2"));
        assert_eq!(store.finish_refresh(None), RefreshEnd::Failed);
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert_eq!(store.get().credentials, CredentialPair::default());
    }

    #[test]
    fn test_finish_refresh_after_sign_out_is_preempted() {
        let store = SessionStore::in_memory();
        store.set_authenticated(CredentialPair::new("a1", "r1"));
        store.begin_refresh(Some("a1"));
        store.clear();
        assert_eq!(
            store.finish_refresh(Some(CredentialPair::new("a2", "r2"))),
            RefreshEnd::Preempted { authenticated: false }
        );
        assert_eq!(store.access_token(), None);
    }

    #[test]
    fn test_begin_refresh_without_refresh_token() {
        let store = SessionStore::in_memory();
        store.set_authenticated(CredentialPair {
            access_token: Some("a1".to_string()),
            refresh_token: None,
        });
        assert_eq!(store.begin_refresh(Some("a1")), RefreshStart::Unavailable);
        assert_eq!(store.status(), SessionStatus::Authenticated);
    }

    #[test]
    fn test_persistent_store_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("session.json");

        let store = SessionStore::persistent(&path).unwrap();
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        store.set_authenticated(CredentialPair::new("a1", "r1"));
        assert!(path.exists());

        let restored = SessionStore::persistent(&path).unwrap();
        assert_eq!(restored.status(), SessionStatus::Authenticated);
        assert_eq!(restored.get().credentials, CredentialPair::new("a1", "r1"));

        restored.clear();
        assert!(!path.exists());
        let empty = SessionStore::persistent(&path).unwrap();
        assert_eq!(empty.status(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn test_corrupt_session_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(SessionStore::persistent(&path).is_err());
    }

    #[test]
    fn test_corrupt_session_file_is_reset() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("session.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = SessionStore::persistent_or_reset(&path);
        assert_eq!(store.status(), SessionStatus::Unauthenticated);
        assert!(!path.exists());

        // Still backed by the same file
        store.set_authenticated(CredentialPair::new("a1", "r1"));
        let restored = SessionStore::persistent(&path).unwrap();
        assert_eq!(restored.get().credentials, CredentialPair::new("a1", "r1"));
    }

    #[test]
    fn test_persistent_or_reset_restores_valid_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("session.json");
        SessionStore::persistent(&path)
            .unwrap()
            .set_authenticated(CredentialPair::new("a1", "r1"));

        let store = SessionStore::persistent_or_reset(&path);
        assert_eq!(store.status(), SessionStatus::Authenticated);
    }
}
