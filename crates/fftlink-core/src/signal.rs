//! Coalesced "new frame available" notification
//!
//! A [`FrameSignal`] is a single pending flag guarded by a mutex and paired
//! with a condition variable. Notifying twice before the waiter wakes leaves
//! exactly one pending wake-up: consumers always read whatever frame is ready
//! at the time they wake, never a backlog.
//!
//! The lock helpers in this module treat a poisoned mutex as unrecoverable and
//! abort the process.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Outcome of [`FrameSignal::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// At least one frame was published since the last wake-up
    Frame,
    /// Shutdown was requested
    Quit,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    quit: bool,
}

/// Single-slot wake-up signal shared by the producer and one consumer
#[derive(Debug)]
pub struct FrameSignal {
    name: &'static str,
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl FrameSignal {
    /// Create a signal; `name` identifies it in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(SignalState::default()),
            cond: Condvar::new(),
        }
    }

    /// Signal name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mark a frame as available and wake the waiter
    pub fn notify(&self) {
        let mut state = lock(&self.state, self.name);
        state.pending = true;
        self.cond.notify_one();
    }

    /// Block until a frame is available or shutdown is requested
    ///
    /// Quit takes precedence over a pending frame.
    pub fn wait(&self) -> Wake {
        let mut state = lock(&self.state, self.name);
        while !state.pending && !state.quit {
            state = wait(&self.cond, state, self.name);
        }
        if state.quit {
            return Wake::Quit;
        }
        state.pending = false;
        Wake::Frame
    }

    /// Consume a pending notification without blocking
    pub fn try_take(&self) -> Option<Wake> {
        let mut state = lock(&self.state, self.name);
        if state.quit {
            Some(Wake::Quit)
        } else if state.pending {
            state.pending = false;
            Some(Wake::Frame)
        } else {
            None
        }
    }

    /// Whether a notification is waiting to be consumed
    pub fn is_pending(&self) -> bool {
        lock(&self.state, self.name).pending
    }

    /// Request the waiter to exit
    pub fn shutdown(&self) {
        let mut state = lock(&self.state, self.name);
        state.quit = true;
        self.cond.notify_all();
    }
}

/// Lock a mutex, aborting the process if it is poisoned
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => {
            tracing::error!(context, "Mutex poisoned, cannot continue safely");
            std::process::abort();
        }
    }
}

/// Wait on a condition variable, aborting the process if the mutex is poisoned
pub(crate) fn wait<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    context: &str,
) -> MutexGuard<'a, T> {
    match cond.wait(guard) {
        Ok(guard) => guard,
        Err(_) => {
            tracing::error!(context, "Condition wait failed, cannot continue safely");
            std::process::abort();
        }
    }
}
