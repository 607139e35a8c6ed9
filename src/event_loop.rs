//! Explicitly owned worker pool driving socket completions.

use std::future::Future;
use std::io;
use std::thread;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

/// Fixed-size worker pool servicing socket readiness and handler tasks.
///
/// Owned process-wide state, created once and passed by reference to
/// [`Server::bind`](crate::Server::bind) and [`Client::new`](crate::Client::new)
/// so callers (tests included) control its lifetime instead of relying on
/// an implicit global.
#[derive(Debug)]
pub struct EventLoop {
    runtime: Option<Runtime>,
}

impl EventLoop {
    /// Pool sized to the machine's available parallelism.
    pub fn new() -> io::Result<Self> {
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_workers(workers)
    }

    /// Pool with a fixed number of worker threads.
    pub fn with_workers(workers: usize) -> io::Result<Self> {
        Self::with_thread_name(workers, "bytewire-worker")
    }

    /// Pool with a fixed size and a thread-naming policy.
    pub fn with_thread_name(workers: usize, name: &str) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(name)
            .enable_all()
            .build()?;
        Ok(EventLoop {
            runtime: Some(runtime),
        })
    }

    /// Handle for spawning work onto the pool and for entering reactor
    /// context when creating sockets.
    ///
    /// # Panics
    /// Panics if the pool has been shut down.
    pub fn handle(&self) -> &Handle {
        match &self.runtime {
            Some(runtime) => runtime.handle(),
            None => panic!("event loop used after shutdown"),
        }
    }

    /// Drive a future to completion on this pool from synchronous code.
    ///
    /// # Panics
    /// Panics if the pool has been shut down.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => panic!("event loop used after shutdown"),
        }
    }

    /// Tear the pool down without waiting for in-flight tasks. Safe to call
    /// more than once.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("shutting down event loop workers");
            runtime.shutdown_background();
        }
    }
}
