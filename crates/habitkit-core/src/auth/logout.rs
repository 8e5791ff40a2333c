/// Notified when a refresh fails and the session has been cleared.
///
/// The core calls this once per failed refresh cycle, after the session
/// store is cleared and before queued requests are rejected. It is the only
/// push notification the core sends; implementors typically route the user
/// back to sign-in.
pub trait LogoutTrigger: Send + Sync {
    fn session_expired(&self);
}

impl<F> LogoutTrigger for F
where
    F: Fn() + Send + Sync,
{
    fn session_expired(&self) {
        self()
    }
}

/// Logout trigger that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogout;

impl LogoutTrigger for NoopLogout {
    fn session_expired(&self) {}
}
