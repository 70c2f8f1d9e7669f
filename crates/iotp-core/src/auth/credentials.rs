//! Credential store interface and the in-memory implementation.
//!
//! The server loads credentials once at startup and hands the store to every
//! [`Authenticator`](super::Authenticator) it creates.  There is no global
//! lookup table.

use std::collections::HashMap;

use super::derive_secret;

/// Secret derived from a password; the key for the response transform.
pub type Secret = [u8; 32];

/// Source of per-user secrets.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Returns the secret for `username`, or `None` if the user is unknown.
    fn lookup_secret(&self, username: &str) -> Option<Secret>;

    /// Number of users the store knows about.
    fn user_count(&self) -> usize;
}

/// A fixed username-to-secret map.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, Secret>,
}

impl StaticCredentials {
    /// Builds a store from `(username, password)` pairs.
    pub fn from_passwords<I, U, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: AsRef<str>,
    {
        let secrets = pairs
            .into_iter()
            .map(|(user, password)| (user.into(), derive_secret(password.as_ref())))
            .collect();
        Self { secrets }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl CredentialStore for StaticCredentials {
    fn lookup_secret(&self, username: &str) -> Option<Secret> {
        self.secrets.get(username).copied()
    }

    fn user_count(&self) -> usize {
        self.secrets.len()
    }
}
