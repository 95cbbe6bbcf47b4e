//! Manual-reset events.

use std::fmt;

use parking_lot::{Condvar, Mutex};

use crate::Timeout;

/// A manual-reset event: once signaled it stays signaled until [`Event::reset`].
///
/// Workers wait on events through
/// [`TaskManager::wait_for_event`](crate::TaskManager::wait_for_event)
/// so the waiting thread keeps running tasks. [`Event::wait`] blocks the thread outright.
#[derive(Default)]
pub struct Event {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event and wake every thread blocked in [`Event::wait`].
    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block until signaled. Returns false if the timeout elapsed first.
    pub fn wait(&self, timeout: Timeout) -> bool {
        let counter = timeout.start();
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match counter.remaining() {
                None => self.condvar.wait(&mut signaled),
                Some(remaining) => {
                    if remaining.is_zero() {
                        return false;
                    }
                    self.condvar.wait_for(&mut signaled, remaining);
                }
            }
        }
        true
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}
