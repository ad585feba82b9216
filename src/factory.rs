//! Resources shared by every connection a client opens.

use crate::buffer::BufferPool;
use crate::error::Error;
use crate::policy::WebSocketPolicy;
use crate::rt::{Executor, Scheduler};

/// The shared-resource bundle behind a client.
///
/// Built once, read-only afterwards, and shared between any number of
/// concurrent connection attempts. Each [`ConnectRequest`](crate::ConnectRequest)
/// carries the factory it was created from, and the connection built for that
/// request takes its executor, scheduler, buffers and policy from here.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    executor: Executor,
    scheduler: Scheduler,
    buffers: BufferPool,
    policy: WebSocketPolicy,
}

impl ClientFactory {
    /// Create a factory from its parts.
    pub fn new(
        executor: Executor,
        scheduler: Scheduler,
        buffers: BufferPool,
        policy: WebSocketPolicy,
    ) -> Self {
        Self {
            executor,
            scheduler,
            buffers,
            policy,
        }
    }

    /// Build a factory, defaulting to the current runtime.
    pub fn builder() -> ClientFactoryBuilder {
        ClientFactoryBuilder::default()
    }

    /// Executor for connection and dispatch tasks.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Timer source for idle timeouts.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Buffer sizing.
    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Connection policy.
    pub fn policy(&self) -> &WebSocketPolicy {
        &self.policy
    }
}

/// Builder for a [`ClientFactory`].
#[derive(Debug, Default)]
pub struct ClientFactoryBuilder {
    executor: Option<Executor>,
    scheduler: Option<Scheduler>,
    buffers: BufferPool,
    policy: WebSocketPolicy,
}

impl ClientFactoryBuilder {
    /// Run tasks on this executor instead of the current runtime.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Create timers with this scheduler instead of the current runtime.
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the buffer sizing.
    pub fn buffers(mut self, buffers: BufferPool) -> Self {
        self.buffers = buffers;
        self
    }

    /// Set the connection policy.
    pub fn policy(mut self, policy: WebSocketPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the factory.
    ///
    /// Fails with [`Error::NoRuntime`] if the executor or scheduler was not set
    /// and there is no current tokio runtime.
    pub fn build(self) -> Result<ClientFactory, Error> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Executor::try_current()?,
        };
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Scheduler::new(executor.handle().clone()),
        };

        Ok(ClientFactory {
            executor,
            scheduler,
            buffers: self.buffers,
            policy: self.policy,
        })
    }
}
