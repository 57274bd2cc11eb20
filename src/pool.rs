//! Pooled transport lifecycle and connection gates.

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::transport::{FailureKind, TransportError};
use crate::{HttpRetryError, Result};

/// Owner of a client's pooled transport.
///
/// The resource is acquired when the handle is created and released exactly
/// once, either by [`release`](Self::release) or when the handle is dropped.
/// Requests already holding a clone of the resource finish normally; new
/// requests fail with [`HttpRetryError::Closed`].
pub struct PooledHandle<T> {
    slot: RwLock<Option<T>>,
}

impl<T: Clone> PooledHandle<T> {
    /// Take ownership of an acquired resource.
    pub fn acquire(resource: T) -> Self {
        Self {
            slot: RwLock::new(Some(resource)),
        }
    }

    /// Get the resource for one request.
    pub fn get(&self) -> Result<T> {
        self.slot.read().clone().ok_or(HttpRetryError::Closed)
    }

    /// Release the resource. Returns `true` only for the call that released it.
    pub fn release(&self) -> bool {
        self.slot.write().take().is_some()
    }

    /// Check whether the resource has been released.
    pub fn is_released(&self) -> bool {
        self.slot.read().is_none()
    }
}

/// Bounds concurrent physical attempts for the async transport.
pub(crate) struct AsyncGate {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl AsyncGate {
    pub(crate) fn new(max_connections: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_connections.min(Semaphore::MAX_PERMITS))),
            timeout,
        }
    }

    /// Wait for a connection slot, failing with a pool timeout.
    pub(crate) async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, TransportError> {
        match tokio::time::timeout(self.timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(e)) => Err(TransportError::new(FailureKind::Other, "connection gate closed").with_source(e)),
            Err(_) => Err(pool_timeout(self.timeout)),
        }
    }
}

/// Bounds concurrent physical attempts for the blocking transport.
pub(crate) struct BlockingGate {
    in_use: Mutex<usize>,
    released: Condvar,
    max: usize,
    timeout: Duration,
}

/// Slot held for the duration of one blocking attempt.
pub(crate) struct BlockingPermit<'a> {
    gate: &'a BlockingGate,
}

impl BlockingGate {
    pub(crate) fn new(max_connections: usize, timeout: Duration) -> Self {
        Self {
            in_use: Mutex::new(0),
            released: Condvar::new(),
            max: max_connections,
            timeout,
        }
    }

    /// Wait for a connection slot, failing with a pool timeout.
    pub(crate) fn acquire(&self) -> std::result::Result<BlockingPermit<'_>, TransportError> {
        let deadline = Instant::now().checked_add(self.timeout);
        let mut in_use = self.in_use.lock();

        while *in_use >= self.max {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut in_use, deadline).timed_out() && *in_use >= self.max {
                        return Err(pool_timeout(self.timeout));
                    }
                }
                None => self.released.wait(&mut in_use),
            }
        }

        *in_use += 1;
        Ok(BlockingPermit { gate: self })
    }
}

impl Drop for BlockingPermit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.gate.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.gate.released.notify_one();
    }
}

fn pool_timeout(timeout: Duration) -> TransportError {
    TransportError::new(
        FailureKind::PoolTimeout,
        format!("no connection available within {timeout:?}"),
    )
}
