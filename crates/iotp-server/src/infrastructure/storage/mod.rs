//! Storage infrastructure: the server config file and the credential file.

pub mod config;
pub mod credentials;

pub use config::{load_config, ConfigError, ServerConfig, DEFAULT_CONFIG_FILE};
pub use credentials::{load_credentials, parse_credentials, CredentialError};
