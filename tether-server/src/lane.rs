//! Per-channel execution lane
//!
//! One worker task runs submitted jobs in order. The lane holds at most one
//! running and one queued job; anything beyond that is refused immediately.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use tether_utils::{Result, TetherError};

use crate::panic::panic_message;

/// Running plus queued jobs a lane accepts
pub const LANE_CAPACITY: usize = 2;

struct Queued {
    job: BoxFuture<'static, ()>,
    // Held until the job finishes
    _permit: OwnedSemaphorePermit,
}

/// Bounded single-worker job queue
pub struct ExecutionLane {
    tx: mpsc::Sender<Queued>,
    permits: Arc<Semaphore>,
    worker: JoinHandle<()>,
}

impl ExecutionLane {
    /// Spawn the worker; must be called inside a tokio runtime
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::channel::<Queued>(LANE_CAPACITY);
        let worker = tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                let Queued { job, _permit } = queued;
                if let Err(payload) = AssertUnwindSafe(job).catch_unwind().await {
                    error!("Lane job panicked: {}", panic_message(payload.as_ref()));
                }
            }
            debug!("Execution lane worker stopped");
        });

        Self {
            tx,
            permits: Arc::new(Semaphore::new(LANE_CAPACITY)),
            worker,
        }
    }

    /// Queue `job`, failing with [`TetherError::LaneBusy`] when the lane is full
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => TetherError::LaneBusy,
                TryAcquireError::Closed => TetherError::ConnectionClosed,
            })?;

        self.tx
            .try_send(Queued {
                job: job.boxed(),
                _permit: permit,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => TetherError::LaneBusy,
                TrySendError::Closed(_) => TetherError::ConnectionClosed,
            })
    }

    /// Jobs currently running or queued
    pub fn occupancy(&self) -> usize {
        LANE_CAPACITY.saturating_sub(self.permits.available_permits())
    }

    /// Refuse new jobs and stop the worker
    pub fn shutdown(&self) {
        self.permits.close();
        self.worker.abort();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for ExecutionLane {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionLane {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl std::fmt::Debug for ExecutionLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLane")
            .field("occupancy", &self.occupancy())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
