//! IOTP server: entry point.
//!
//! The server owns one home of controllable devices and serves any number of
//! authenticated clients over TCP.  Every client receives a snapshot of the
//! home, may change devices, and is told about changes made by the others.
//!
//! # Usage
//!
//! ```text
//! iotp-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Server config file [default: iotp-server.toml]
//!   --port   <PORT>   Overrides server.port from the config file
//!   --bind   <ADDR>   Overrides server.bind_address from the config file
//! ```
//!
//! # Shutting down
//!
//! Press Ctrl+C or type `t` and Enter.  The server stops accepting, sends
//! TERMINATE to every client and exits once all sessions have closed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use iotp_core::devices::HomeGenerator;
use iotp_core::{Authenticator, SharedHome};
use tracing::info;
use tracing_subscriber::EnvFilter;

use iotp_server::infrastructure::console::spawn_console;
use iotp_server::infrastructure::network::{bind, run_server, ServerContext};
use iotp_server::infrastructure::storage::config::resolve_relative;
use iotp_server::infrastructure::storage::{
    load_config, load_credentials, ServerConfig, DEFAULT_CONFIG_FILE,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// IOTP home server.
#[derive(Debug, Parser)]
#[command(name = "iotp-server", about = "IoT Home Control Protocol server", version)]
struct Cli {
    /// Path of the TOML config file.  A missing file means all defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env = "IOTP_CONFIG")]
    config: PathBuf,

    /// TCP port to listen on.
    #[arg(long, env = "IOTP_PORT")]
    port: Option<u16>,

    /// IP address to bind to.
    #[arg(long, env = "IOTP_BIND")]
    bind: Option<String>,
}

impl Cli {
    /// Applies command-line overrides on top of the file config.
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);

    // `RUST_LOG` wins over the configured level when it is set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    // ── Credentials and home ──────────────────────────────────────────────────
    let credentials_path = resolve_relative(&cli.config, &config.auth.credentials_path);
    let store = load_credentials(&credentials_path).with_context(|| {
        format!(
            "cannot start without credentials from {}",
            credentials_path.display()
        )
    })?;

    let home = HomeGenerator::new(config.home.seed, config.home.max_devices_per_type).generate();
    info!(devices = home.device_count(), "home generated\n{home}");

    let context = Arc::new(ServerContext::new(
        SharedHome::new(home),
        Authenticator::new(Arc::new(store)),
        config.server.version.clone(),
        config.server.read_timeout(),
    ));

    // ── Listener ──────────────────────────────────────────────────────────────
    let addr = config.server.socket_addr()?;
    let listener = bind(addr).await?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));

    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_signal.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    spawn_console(Arc::clone(&running)).context("failed to start console thread")?;
    info!("type 't' and Enter to terminate the server");

    run_server(listener, context, config.server.listen_timeout(), running).await?;

    info!("IOTP server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_use_default_config_file() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = Cli::parse_from(["iotp-server"]);

        // Assert
        assert_eq!(cli.config, PathBuf::from("iotp-server.toml"));
        assert!(cli.port.is_none());
        assert!(cli.bind.is_none());
    }

    #[test]
    fn test_port_and_bind_override_file_values() {
        // Arrange
        let cli = Cli::parse_from(["iotp-server", "--port", "9999", "--bind", "127.0.0.1"]);
        let mut config = ServerConfig::default();

        // Act
        cli.apply_overrides(&mut config);

        // Assert
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_absent_overrides_keep_file_values() {
        let cli = Cli::parse_from(["iotp-server"]);
        let mut config = ServerConfig::default();
        config.server.port = 9100;

        cli.apply_overrides(&mut config);

        assert_eq!(config.server.port, 9100);
    }
}
