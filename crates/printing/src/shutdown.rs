//! Strategies for stopping a job's worker thread without blocking the UI
//! runner.

use std::fmt;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::worker::PrintJobWorker;

/// Next action for a job shutting down its worker.
pub enum ShutdownStep {
    /// Join this handle off the UI runner, then finish.
    Join(JoinHandle<()>),
    /// Ask again after the delay.
    RetryAfter(Duration),
    /// Nothing left to wait for.
    Finished,
}

impl fmt::Debug for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStep::Join(_) => f.write_str("Join"),
            ShutdownStep::RetryAfter(delay) => f.debug_tuple("RetryAfter").field(delay).finish(),
            ShutdownStep::Finished => f.write_str("Finished"),
        }
    }
}

pub trait WorkerShutdownPolicy: Send + Sync + fmt::Debug {
    fn shutdown_step(&self, worker: &mut PrintJobWorker) -> ShutdownStep;
}

/// Hands the thread to a helper that blocks on the join.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingShutdown;

impl WorkerShutdownPolicy for BlockingShutdown {
    fn shutdown_step(&self, worker: &mut PrintJobWorker) -> ShutdownStep {
        worker.stop_soon();
        match worker.detach_thread() {
            Some(handle) => ShutdownStep::Join(handle),
            None => ShutdownStep::Finished,
        }
    }
}

/// Re-checks on the UI runner until the thread has exited.
///
/// Used where a platform dialog may still be pumping on the worker.
#[derive(Debug, Clone, Copy)]
pub struct PollingShutdown {
    pub interval: Duration,
}

impl WorkerShutdownPolicy for PollingShutdown {
    fn shutdown_step(&self, worker: &mut PrintJobWorker) -> ShutdownStep {
        worker.stop_soon();
        if worker.is_running() {
            return ShutdownStep::RetryAfter(self.interval);
        }
        match worker.detach_thread() {
            Some(handle) => ShutdownStep::Join(handle),
            None => ShutdownStep::Finished,
        }
    }
}
