//! Terminal front end: stdin lines and the interactive action prompt.
//!
//! # Why a dedicated stdin thread? (for beginners)
//!
//! Reading stdin blocks until the user presses Enter, and there is no way to
//! interrupt that read.  If it ran inside the Tokio runtime, the runtime
//! could not shut down while a read was pending.  So one plain OS thread
//! reads stdin for the whole process and forwards each line over a channel.
//! Consumers wait on the channel instead, with a timeout, and can give up
//! whenever they are cancelled.

use std::io::{self, BufRead};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use iotp_core::Home;
use tracing::{debug, warn};

use crate::application::prompt::collect_action;
use crate::application::{ActionRequest, ActionSource, CancelFlag};

/// How often a waiting prompt looks at its cancellation flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Starts the stdin thread.  `forward` receives every line and returns
/// `false` once nobody wants more input, which stops the thread after the
/// next line.
///
/// # Errors
///
/// Returns an error if the OS refuses to create the thread.
pub fn spawn_stdin_reader<F>(mut forward: F) -> io::Result<JoinHandle<()>>
where
    F: FnMut(String) -> bool + Send + 'static,
{
    std::thread::Builder::new()
        .name("iotp-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if !forward(line) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin unreadable: {e}");
                        break;
                    }
                }
            }
            debug!("stdin reader finished");
        })
}

/// Waits for the next line, giving up when `cancel` is set or the reader
/// has finished.
pub fn next_line(lines: &Receiver<String>, cancel: &CancelFlag) -> Option<String> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        match lines.recv_timeout(CANCEL_POLL) {
            Ok(line) => return Some(line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// [`ActionSource`] that asks the person at the terminal.
pub struct StdinActionPrompt {
    lines: Arc<Mutex<Receiver<String>>>,
}

impl StdinActionPrompt {
    /// Starts reading stdin and returns the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the stdin thread cannot be created.
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        spawn_stdin_reader(move |line| tx.send(line).is_ok())?;
        Ok(Self::from_receiver(rx))
    }

    /// Builds a prompt over any line channel.
    pub fn from_receiver(lines: Receiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
        }
    }
}

#[async_trait]
impl ActionSource for StdinActionPrompt {
    async fn next_action(&self, home: Home, cancel: CancelFlag) -> Option<ActionRequest> {
        let lines = Arc::clone(&self.lines);
        let dialog = tokio::task::spawn_blocking(move || {
            // A cancelled dialog may still hold the receiver for up to one
            // poll interval; the next one simply waits for it.
            let lines = lines.lock().unwrap_or_else(PoisonError::into_inner);
            let mut out = io::stdout();
            collect_action(&home, || next_line(&lines, &cancel), &mut out)
        });
        match dialog.await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                warn!("cannot write prompt: {e}");
                None
            }
            Err(e) => {
                warn!("prompt task failed: {e}");
                None
            }
        }
    }
}
