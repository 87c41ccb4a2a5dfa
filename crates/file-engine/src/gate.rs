//! Admission control.
//!
//! A counting gate bounding the number of concurrently executing
//! operations. Every public engine operation acquires a permit before doing
//! any work and releases it on drop; the release path records the
//! operation's category and latency before freeing the slot.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{EngineError, Result};
use crate::metrics::{EngineMetrics, OpKind};

/// Bounded counting gate for operation admission.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    metrics: Arc<EngineMetrics>,
}

impl AdmissionGate {
    pub fn new(parallelism: usize, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(parallelism)),
            metrics,
        }
    }

    /// Waits for a slot.
    ///
    /// Fails with `Cancelled` once the gate has been closed; a caller that
    /// drops the returned future before completion never occupies a slot.
    pub async fn acquire(&self, op: OpKind) -> Result<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Cancelled)?;
        Ok(AdmissionPermit {
            _permit: permit,
            metrics: self.metrics.clone(),
            op,
            started: Instant::now(),
        })
    }

    /// Closes the gate. Pending and future acquires fail with `Cancelled`;
    /// operations already admitted run to completion.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A slot in the gate, held for the duration of one operation.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    metrics: Arc<EngineMetrics>,
    op: OpKind,
    started: Instant,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Metrics first, then the slot frees when `_permit` drops.
        self.metrics.record(self.op, self.started.elapsed());
    }
}
