//! Synced register cell
//!
//! A [`SyncCell`] holds the latest raw value published by a gate for one
//! device register. A caller that just asked the gate for the register
//! waits on the cell until the matching publish lands; the reader task is
//! the single writer, any number of caller tasks may wait.

use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::Notify;
use tokio::time::{self, Duration};

/// One-shot-settable value with wait, reset and timestamp
///
/// `update` marks the cell set and wakes every waiter; `reset` marks it
/// pending again so the next `get` blocks until a fresh publish. Last
/// writer wins when two updates race, and every waiter observes the value
/// present at the end of its own wait.
#[derive(Debug)]
pub struct SyncCell<T> {
    state: Mutex<Option<(T, Instant)>>,
    notify: Notify,
}

impl<T: Clone> SyncCell<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store a freshly published value and wake all waiters.
    pub fn update(&self, value: T) {
        *self.state.lock().unwrap() = Some((value, Instant::now()));
        self.notify.notify_waiters();
    }

    /// Mark the value as obsolete; subsequent `get` calls block again.
    pub fn reset(&self) {
        *self.state.lock().unwrap() = None;
    }

    /// Check whether the cell has been set since the last reset.
    pub fn is_set(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// Current value, if set, without waiting.
    pub fn peek(&self) -> Option<T> {
        self.state.lock().unwrap().as_ref().map(|(v, _)| v.clone())
    }

    /// Monotonic instant of the last update, if set.
    pub fn timestamp(&self) -> Option<Instant> {
        self.state.lock().unwrap().as_ref().map(|(_, t)| *t)
    }

    /// Wait until the cell is set, up to `timeout`.
    ///
    /// Returns `None` if no update arrived in time.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = time::Instant::now() + timeout;
        loop {
            // registered before the check so an update in between still wakes us
            let notified = self.notify.notified();
            if let Some(value) = self.peek() {
                return Some(value);
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return self.peek();
            }
        }
    }
}

impl<T: Clone> Default for SyncCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
