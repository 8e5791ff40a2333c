use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "habitkit";

/// Remembered sign-in passwords, kept in the OS keychain keyed by email.
pub struct CredentialStore;

impl CredentialStore {
    /// Store the sign-in password for an email in the OS keychain
    pub fn store(email: &str, password: &str) -> Result<()> {
        Self::entry(email)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// Retrieve the remembered password for an email
    pub fn get_password(email: &str) -> Result<String> {
        Self::entry(email)?
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Forget the remembered password for an email.
    /// Returns `false` when nothing was stored.
    pub fn delete(email: &str) -> Result<bool> {
        match Self::entry(email)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }

    pub fn has_credentials(email: &str) -> bool {
        Self::entry(email)
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }

    fn entry(email: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_without_stored_password() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        assert!(!CredentialStore::has_credentials("nobody@example.com"));
        assert!(!CredentialStore::delete("nobody@example.com").unwrap());
    }
}
