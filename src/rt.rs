//! Runtime handles used to run connection tasks and timers.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::error::Error;

/// Runs connection and dispatch tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    /// Create an executor for the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create an executor for the runtime we are currently running on.
    pub fn try_current() -> Result<Self, Error> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::NoRuntime)
    }

    /// Spawn a future onto the runtime.
    pub fn execute<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// The underlying runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Creates timers on a tokio runtime, for idle timeouts.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    /// Create a scheduler for the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a scheduler for the runtime we are currently running on.
    pub fn try_current() -> Result<Self, Error> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::NoRuntime)
    }

    /// A timer which fires after `duration`.
    ///
    /// Can be called from outside the runtime.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let _guard = self.handle.enter();
        tokio::time::sleep(duration)
    }
}
