//! Loads the user table the server authenticates against.
//!
//! The credentials file is a TOML document with a single `[users]` table
//! mapping username to password:
//!
//! ```toml
//! [users]
//! abhi = "abhi1234"
//! romit = "romit123"
//! ```
//!
//! Passwords are turned into secrets as soon as they are read; the plain
//! text is not kept in memory beyond this module.  A server without users
//! cannot authenticate anyone, so an empty table is an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use iotp_core::StaticCredentials;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Error type for loading the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error reading credentials at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credentials TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("credential store {0} defines no users")]
    Empty(PathBuf),
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    users: BTreeMap<String, String>,
}

/// Parses credential TOML text.
///
/// # Errors
///
/// Returns [`CredentialError::Parse`] for malformed TOML.  An empty table is
/// returned as an empty store; [`load_credentials`] decides that is fatal.
pub fn parse_credentials(text: &str) -> Result<StaticCredentials, CredentialError> {
    let file: CredentialFile = toml::from_str(text)?;
    Ok(StaticCredentials::from_passwords(file.users))
}

/// Reads and parses the credential file at `path`.
///
/// # Errors
///
/// Returns [`CredentialError::Io`] if the file cannot be read (including when
/// it does not exist), [`CredentialError::Parse`] for malformed TOML, and
/// [`CredentialError::Empty`] if it defines no users.
pub fn load_credentials(path: &Path) -> Result<StaticCredentials, CredentialError> {
    let text = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let store = parse_credentials(&text)?;
    if store.is_empty() {
        return Err(CredentialError::Empty(path.to_path_buf()));
    }
    info!(path = %path.display(), "credential store loaded");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotp_core::auth::{build_user_response, generate_challenge};
    use iotp_core::{Authenticator, CredentialStore};
    use std::sync::Arc;

    #[test]
    fn test_parse_credentials_reads_users_table() {
        // Arrange
        let text = "[users]\nabhi = \"abhi1234\"\nmike = \"mike1234\"\n";

        // Act
        let store = parse_credentials(text).unwrap();

        // Assert
        assert_eq!(store.user_count(), 2);
        let auth = Authenticator::new(Arc::new(store));
        let challenge = generate_challenge();
        let body = build_user_response("mike", "mike1234", &challenge);
        assert!(auth.verify(&challenge, &body));
    }

    #[test]
    fn test_parse_credentials_without_table_is_empty() {
        let store = parse_credentials("").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_parse_credentials_rejects_non_string_password() {
        let result = parse_credentials("[users]\nabhi = 1234\n");
        assert!(matches!(result, Err(CredentialError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("iotp_no_such_credentials.toml");
        assert!(matches!(
            load_credentials(&path),
            Err(CredentialError::Io { .. })
        ));
    }

    #[test]
    fn test_load_empty_store_is_fatal() {
        // Arrange
        let path = std::env::temp_dir().join(format!(
            "iotp_empty_credentials_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[users]\n").unwrap();

        // Act
        let result = load_credentials(&path);

        // Assert
        assert!(matches!(result, Err(CredentialError::Empty(_))));
        let _ = std::fs::remove_file(&path);
    }
}
