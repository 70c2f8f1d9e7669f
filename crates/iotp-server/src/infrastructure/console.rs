//! Local shutdown command read from stdin.
//!
//! Typing `t` (or `T`) and Enter in the server's terminal stops the server
//! the same way Ctrl+C does: the `running` flag is cleared and the accept
//! loop drains every session.
//!
//! The reader runs on a plain OS thread instead of a Tokio task.  A blocking
//! stdin read inside the runtime would keep the runtime from shutting down
//! until the user pressed Enter.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

/// Returns `true` if `line` is the terminate command.
pub fn is_terminate_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("t")
}

/// Reads lines until the terminate command appears.
///
/// Returns `true` when the command was read and `false` on end of input or a
/// read error, in which case the server keeps running.
pub fn wait_for_terminate<R: BufRead>(reader: R) -> bool {
    for line in reader.lines() {
        match line {
            Ok(line) if is_terminate_command(&line) => return true,
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => info!("unknown command {:?}; type 't' to terminate the server", line.trim()),
            Err(e) => {
                warn!("stdin unreadable, console command disabled: {e}");
                return false;
            }
        }
    }
    false
}

/// Starts the console thread.  It clears `running` once `t` is entered.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_console(running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("iotp-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            if wait_for_terminate(stdin.lock()) {
                info!("terminate command received; initiating graceful shutdown");
                running.store(false, Ordering::Relaxed);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_terminate_command_accepts_either_case() {
        assert!(is_terminate_command("t"));
        assert!(is_terminate_command("  T \r"));
        assert!(!is_terminate_command("terminate"));
        assert!(!is_terminate_command(""));
    }

    #[test]
    fn test_wait_for_terminate_skips_other_lines() {
        // Arrange
        let input = Cursor::new("status\n\nt\nnever read\n");

        // Act / Assert
        assert!(wait_for_terminate(input));
    }

    #[test]
    fn test_end_of_input_does_not_terminate() {
        assert!(!wait_for_terminate(Cursor::new("x\ny\n")));
    }
}
