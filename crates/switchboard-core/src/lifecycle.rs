//! Process-lifecycle contract consumed by the reactor: a cooperative
//! `start()`/`stop()` pair backed by a shared atomic state, so a signal
//! handler or a supervising thread can ask the reactor to shut down without
//! touching its internals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const NEW: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// A cheaply cloneable handle over the reactor's run state.
///
/// `stop()` may be called from any thread (the expected use is a `ctrlc`
/// handler); the reactor observes the state at the top of each poll
/// iteration.
#[derive(Clone)]
pub struct Lifecycle {
    state: Arc<AtomicU8>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { state: Arc::new(AtomicU8::new(NEW)) }
    }

    /// Transitions `NEW -> RUNNING`. Fails if the reactor has already been
    /// run or stopped: a reactor is only ever run once.
    pub(crate) fn enter_running(&self) -> Result<(), &'static str> {
        self.state
            .compare_exchange(NEW, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| "reactor has already been run")
    }

    /// Requests that the reactor stop at the top of its next poll iteration.
    pub fn stop(&self) {
        self.state.store(STOPPED, Ordering::SeqCst);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STOPPED
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
