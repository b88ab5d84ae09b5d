//! Delivery of callbacks onto the controller's thread.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub type Callback = Box<dyn FnOnce() + Send>;

/// Sending half, shared by background waiters.
#[derive(Clone)]
pub struct CallbackDispatcher {
    sender: Sender<Callback>,
}

/// Receiving half, owned by the controller and pumped on its thread.
pub struct ControllerQueue {
    receiver: Receiver<Callback>,
}

pub fn controller_queue() -> (CallbackDispatcher, ControllerQueue) {
    let (sender, receiver) = mpsc::channel();
    (CallbackDispatcher { sender }, ControllerQueue { receiver })
}

impl CallbackDispatcher {
    /// Queues `callback`; returns false once the controller queue is gone.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Box::new(callback)).is_ok()
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher").finish_non_exhaustive()
    }
}

impl ControllerQueue {
    /// Runs every queued callback without blocking.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.receiver.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for one callback and runs it.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(callback) => {
                callback();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}
