//! Counting semaphores and cooperative cancellation built on
//! `crossbeam-channel`.
//!
//! A [`Semaphore`] is an unbounded channel of unit tokens: `post` sends one
//! token, `wait` receives one. A [`CancelToken`] is the receiving end of a
//! channel nobody ever sends on; dropping the [`CancelSource`] disconnects it,
//! which every waiter observes at once.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, select, unbounded};
use std::time::Duration;

/// Returned by a wait that was interrupted by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Owner side of a cancellation signal
pub struct CancelSource {
    trigger: Option<Sender<()>>,
    token: CancelToken,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            trigger: Some(tx),
            token: CancelToken { done: rx },
        }
    }

    /// Token handed to worker threads
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Signal every holder of a token. Idempotent.
    pub fn cancel(&mut self) {
        self.trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.trigger.is_none()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal
#[derive(Clone, Debug)]
pub struct CancelToken {
    done: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `period`, returning early with `Err(Cancelled)` on cancellation
    pub fn sleep(&self, period: Duration) -> Result<(), Cancelled> {
        match self.done.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(Cancelled),
        }
    }
}

/// Counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    post_tx: Sender<()>,
    wait_rx: Receiver<()>,
}

impl Semaphore {
    /// New semaphore with a count of zero
    pub fn new() -> Self {
        let (post_tx, wait_rx) = unbounded();
        Self { post_tx, wait_rx }
    }

    pub fn post(&self) {
        // Cannot fail: we hold the receiver for as long as the sender lives
        let _ = self.post_tx.send(());
    }

    /// Block until a token is available or `cancel` fires.
    ///
    /// Cancellation is re-checked after a token is taken, so a thread never
    /// proceeds past a wait once shutdown has started.
    pub fn wait(&self, cancel: &CancelToken) -> Result<(), Cancelled> {
        select! {
            recv(self.wait_rx) -> token => {
                if token.is_err() || cancel.is_cancelled() {
                    Err(Cancelled)
                } else {
                    Ok(())
                }
            }
            recv(cancel.done) -> _ => Err(Cancelled),
        }
    }

    /// Take a token if one is available
    pub fn try_wait(&self) -> bool {
        self.wait_rx.try_recv().is_ok()
    }

    /// Wait up to `timeout` for a token
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// The four semaphores serving one port pair
#[derive(Debug, Default)]
pub struct Signals {
    /// Posted by the reader when its cycle is finished
    pub monitor: Semaphore,
    /// Posted by the monitor to start a reader cycle
    pub reader: Semaphore,
    /// Posted by the reader to release one frame transmission
    pub writer: Semaphore,
    /// Posted by the concurrent peer once both ports are configured
    pub concurrent: Semaphore,
}
