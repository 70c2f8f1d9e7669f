//! An [`ActionSource`] that replays a fixed list of requests.
//!
//! Used by the integration tests and handy for demos: the session runs
//! exactly as it would with a person at the keyboard, but every answer is
//! known in advance.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use iotp_core::Home;

use crate::application::{ActionRequest, ActionSource, CancelFlag};

/// How often a waiting script looks at its cancellation flag.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Replays requests in order, then either gives up or waits to be cancelled.
#[derive(Debug, Default)]
pub struct ScriptedActions {
    requests: Mutex<VecDeque<ActionRequest>>,
    homes_seen: Mutex<Vec<Home>>,
    wait_when_empty: bool,
}

impl ScriptedActions {
    pub fn new(requests: impl IntoIterator<Item = ActionRequest>) -> Self {
        Self {
            requests: Mutex::new(requests.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Once the script is exhausted, block until cancelled instead of
    /// returning `None` straight away.  Lets a test keep a client logged in
    /// and listening for updates.
    pub fn then_wait(mut self) -> Self {
        self.wait_when_empty = true;
        self
    }

    /// Every home the session offered, oldest first.
    pub fn homes_seen(&self) -> Vec<Home> {
        lock(&self.homes_seen).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl ActionSource for ScriptedActions {
    async fn next_action(&self, home: Home, cancel: CancelFlag) -> Option<ActionRequest> {
        lock(&self.homes_seen).push(home);
        if let Some(request) = lock(&self.requests).pop_front() {
            return Some(request);
        }
        if self.wait_when_empty {
            while !cancel.load(Ordering::Relaxed) {
                tokio::time::sleep(CANCEL_POLL).await;
            }
        }
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
