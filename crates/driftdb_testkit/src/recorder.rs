//! Channels that hooks report into.
//!
//! Strategy hooks and error handlers run on a session's worker thread. A
//! test hands them a [`HookRecorder`] clone, then waits on the test thread
//! for what they recorded.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// A cloneable, thread-safe event channel.
pub struct HookRecorder<T> {
    sender: Arc<Mutex<Sender<T>>>,
    receiver: Arc<Mutex<Receiver<T>>>,
}

impl<T> Clone for HookRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<T: Send + std::fmt::Debug> HookRecorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender: Arc::new(Mutex::new(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Records an event.
    pub fn record(&self, event: T) {
        // the receiver lives as long as any clone, including this one
        let _ = self.sender.lock().send(event);
    }

    /// Waits for the next event, panicking after `timeout`.
    pub fn receive_or_fail(&self, timeout: Duration) -> T {
        match self.receiver.lock().recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => panic!("no event recorded within {timeout:?}"),
            Err(RecvTimeoutError::Disconnected) => panic!("recorder disconnected"),
        }
    }

    /// Asserts that nothing more is recorded within `wait`.
    pub fn assert_silent(&self, wait: Duration) {
        if let Ok(event) = self.receiver.lock().recv_timeout(wait) {
            panic!("unexpected event recorded: {event:?}");
        }
    }

    /// Takes everything recorded so far without waiting.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.lock().try_iter().collect()
    }
}

impl<T: Send + std::fmt::Debug> Default for HookRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}
