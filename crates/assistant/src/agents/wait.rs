//! Bounded wait for page elements
//!
//! The host page notifies a [`MutationSignal`] whenever its DOM changes.
//! Waiters re-probe only when woken by a mutation, and give up at a
//! deadline or when observation is cancelled.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of waiting for an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Found(T),
    /// Observation was cancelled before the element appeared
    NotFound,
    TimedOut,
}

#[derive(Default)]
struct SignalState {
    generation: u64,
    cancelled: bool,
}

/// Mutation notifications from the host page
#[derive(Default)]
pub struct MutationSignal {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl MutationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a DOM mutation and wake waiters
    pub fn notify(&self) {
        self.lock().generation += 1;
        self.changed.notify_all();
    }

    /// Stop observing; pending and future waits end with `NotFound`
    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Wait until `probe` finds something, re-probing after each mutation
    pub fn wait_for<T>(
        &self,
        timeout: Duration,
        mut probe: impl FnMut() -> Option<T>,
    ) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut seen = self.lock().generation;

        loop {
            // Probe without holding the lock: the host may notify from inside.
            if let Some(found) = probe() {
                return WaitOutcome::Found(found);
            }

            let mut state = self.lock();
            loop {
                if state.cancelled {
                    return WaitOutcome::NotFound;
                }
                if state.generation != seen {
                    seen = state.generation;
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                state = match self.changed.wait_timeout(state, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(e) => e.into_inner().0,
                };
            }
        }
    }
}
