//! IOTP client: entry point.
//!
//! # Usage
//!
//! ```text
//! iotp-client [OPTIONS]
//!
//! Options:
//!   --host <HOST>             Server host [default: 127.0.0.1]
//!   --port <PORT>             Server port [default: 9070]
//!   --login <USER:PASSWORD>   Login; required in interactive mode
//!   --raw                     Hex console mode (alias: --default)
//!   --read-timeout-ms <MS>    Bounded wait between reads [default: 1000]
//!   --log-level <LEVEL>       Log level when RUST_LOG is unset [default: info]
//! ```
//!
//! # Modes
//!
//! **Interactive** (default): logs in, shows the home and asks which device
//! to operate.  Typing `t` at any question ends the session.
//!
//! **Raw** (`--raw`): every line typed is sent to the server as a hex
//! message and every reply is printed.  Useful for poking at a server by
//! hand.
//!
//! Neither mode reconnects: once the session ends the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use iotp_core::dfa::Credentials;
use iotp_core::{ClientDfa, PROTOCOL_VERSION};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use iotp_client::infrastructure::network::{connect, run_session, ClientEnd};
use iotp_client::infrastructure::raw_console::run_raw_console;
use iotp_client::infrastructure::terminal::{spawn_stdin_reader, StdinActionPrompt};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// IOTP home client.
#[derive(Debug, Parser)]
#[command(name = "iotp-client", about = "IoT Home Control Protocol client", version)]
struct Cli {
    /// Server host name or IP address.
    #[arg(long, default_value = "127.0.0.1", env = "IOTP_HOST")]
    host: String,

    /// Server TCP port.
    #[arg(long, default_value_t = 9070, env = "IOTP_PORT")]
    port: u16,

    /// Login as `user:password`.
    #[arg(long, value_parser = parse_login, env = "IOTP_LOGIN")]
    login: Option<Credentials>,

    /// Send hex lines typed on stdin instead of using the interactive prompt.
    #[arg(long, alias = "default")]
    raw: bool,

    /// How long one read may wait before the session checks for local events.
    #[arg(long, default_value_t = 1000)]
    read_timeout_ms: u64,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses `user:password`.  The password may itself contain `:`.
fn parse_login(value: &str) -> Result<Credentials, String> {
    match value.split_once(':') {
        Some((user, password)) if !user.is_empty() && !password.is_empty() => {
            Ok(Credentials::new(user, password))
        }
        _ => Err("expected user:password".to_string()),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    if cli.raw {
        run_raw(&cli).await
    } else {
        run_interactive(&cli).await
    }
}

async fn run_interactive(cli: &Cli) -> anyhow::Result<()> {
    let Some(credentials) = cli.login.clone() else {
        bail!("interactive mode needs --login user:password (or use --raw)");
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; terminating session");
                running_signal.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let prompt = StdinActionPrompt::spawn().context("failed to start stdin reader")?;
    let end = run_session(
        &cli.server_addr(),
        ClientDfa::new(PROTOCOL_VERSION, credentials),
        Arc::new(prompt),
        Duration::from_millis(cli.read_timeout_ms),
        running,
    )
    .await?;

    match &end {
        ClientEnd::Terminated | ClientEnd::ServerTerminated => info!("session {end}"),
        ClientEnd::ServerError(_) | ClientEnd::ProtocolError(_) => warn!("session ended: {end}"),
    }
    Ok(())
}

async fn run_raw(cli: &Cli) -> anyhow::Result<()> {
    let stream = connect(&cli.server_addr()).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(move |line| tx.send(line).is_ok()).context("failed to start stdin reader")?;

    let mut out = std::io::stdout();
    tokio::select! {
        end = run_raw_console(stream, rx, &mut out, cli.login.as_ref()) => {
            let end = end?;
            info!("raw console stopped: {end:?}");
        }
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C; leaving raw console"),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = Cli::parse_from(["iotp-client"]);

        // Assert
        assert_eq!(cli.server_addr(), "127.0.0.1:9070");
        assert!(cli.login.is_none());
        assert!(!cli.raw);
        assert_eq!(cli.read_timeout_ms, 1000);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_login_is_split_at_first_colon() {
        let cli = Cli::parse_from(["iotp-client", "--login", "abhi:pa:ss"]);

        assert_eq!(cli.login, Some(Credentials::new("abhi", "pa:ss")));
    }

    #[test]
    fn test_login_without_password_is_rejected() {
        assert!(Cli::try_parse_from(["iotp-client", "--login", "abhi"]).is_err());
        assert!(Cli::try_parse_from(["iotp-client", "--login", "abhi:"]).is_err());
    }

    #[test]
    fn test_default_is_an_alias_for_raw() {
        let cli = Cli::parse_from(["iotp-client", "--default", "--port", "9100"]);

        assert!(cli.raw);
        assert_eq!(cli.server_addr(), "127.0.0.1:9100");
    }
}
