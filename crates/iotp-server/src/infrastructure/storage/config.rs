//! TOML-based configuration for the server.
//!
//! The server reads one file, `iotp-server.toml` in the working directory by
//! default (or the path given with `--config`):
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 9070
//! listen_timeout_ms = 1000
//! read_timeout_ms = 1000
//! version = "IOTP 0001"
//!
//! [home]
//! seed = 4
//! max_devices_per_type = 3
//!
//! [auth]
//! credentials_path = "credentials.toml"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Serde default values
//!
//! Every field is annotated with `#[serde(default = "some_fn")]`, so a file
//! may leave out any field or whole section.  A missing file is not an error
//! either: [`load_config`] returns [`ServerConfig::default`].

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use iotp_core::devices::generator::{DEFAULT_MAX_PER_TYPE, DEFAULT_SEED};
use iotp_core::PROTOCOL_VERSION;
use serde::Deserialize;
use thiserror::Error;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "iotp-server.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and session timing settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListenConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bounded wait of the accept loop, after which it checks for shutdown.
    #[serde(default = "default_timeout_ms")]
    pub listen_timeout_ms: u64,
    /// Bounded wait of every session read, after which the session flushes
    /// queued updates and checks its termination flag.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Version string offered to and required from clients.
    #[serde(default = "default_version")]
    pub version: String,
}

/// Demo home generation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HomeConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_devices_per_type")]
    pub max_devices_per_type: u8,
}

/// Where user credentials come from.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    /// Relative paths are resolved against the config file's directory.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9070
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}
fn default_seed() -> u64 {
    DEFAULT_SEED
}
fn default_max_devices_per_type() -> u8 {
    DEFAULT_MAX_PER_TYPE
}
fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.toml")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            listen_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            version: default_version(),
        }
    }
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            max_devices_per_type: default_max_devices_per_type(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ListenConfig {
    /// The socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `bind_address` is not
    /// an IPv4 or IPv6 address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ── Load ──────────────────────────────────────────────────────────────────────

/// Loads the config at `path`, returning `ServerConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolves a path from the config file relative to the file's directory.
pub fn resolve_relative(config_path: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        return target.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) => dir.join(target),
        None => target.to_path_buf(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("iotp_config_{name}_{}", std::process::id()))
    }

    #[test]
    fn test_default_config_matches_protocol_constants() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.server.port, 9070);
        assert_eq!(cfg.server.listen_timeout_ms, 1000);
        assert_eq!(cfg.server.read_timeout_ms, 1000);
        assert_eq!(cfg.server.version, "IOTP 0001");
        assert_eq!(cfg.home.seed, 4);
        assert_eq!(cfg.home.max_devices_per_type, 3);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_partial_file_fills_missing_fields_with_defaults() {
        // Arrange
        let text = "[server]\nport = 9999\n\n[home]\nseed = 11\n";

        // Act
        let cfg: ServerConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
        assert_eq!(cfg.home.seed, 11);
        assert_eq!(cfg.home.max_devices_per_type, 3);
        assert_eq!(cfg.auth.credentials_path, PathBuf::from("credentials.toml"));
    }

    #[test]
    fn test_empty_file_is_default_config() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let path = scratch_dir("malformed").join("bad.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[server\nport = ").unwrap();

        let result = load_config(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = scratch_dir("missing").join("absent.toml");
        assert_eq!(load_config(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_load_reads_values_from_file() {
        // Arrange
        let dir = scratch_dir("load");
        let path = dir.join(DEFAULT_CONFIG_FILE);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            &path,
            "[server]\nport = 9100\nread_timeout_ms = 250\n\n[home]\nmax_devices_per_type = 5\n",
        )
        .unwrap();

        // Act
        let cfg = load_config(&path).unwrap();

        // Assert
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.read_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.home.max_devices_per_type, 5);
        assert_eq!(cfg.logging, LoggingConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_socket_addr_combines_bind_and_port() {
        let mut listen = ListenConfig::default();
        listen.bind_address = "127.0.0.1".into();
        listen.port = 9071;
        assert_eq!(listen.socket_addr().unwrap().to_string(), "127.0.0.1:9071");
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let mut listen = ListenConfig::default();
        listen.bind_address = "not.an.ip".into();
        assert!(matches!(
            listen.socket_addr(),
            Err(ConfigError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_relative_credentials_path_follows_config_file() {
        let resolved = resolve_relative(
            Path::new("/etc/iotp/iotp-server.toml"),
            Path::new("credentials.toml"),
        );
        assert_eq!(resolved, PathBuf::from("/etc/iotp/credentials.toml"));

        let absolute = resolve_relative(Path::new("cfg.toml"), Path::new("/srv/creds.toml"));
        assert_eq!(absolute, PathBuf::from("/srv/creds.toml"));
    }
}
