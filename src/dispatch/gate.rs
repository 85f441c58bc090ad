//! Fixed-capacity gate bounding in-flight tasks.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::DispatchError;

/// Counting gate over a tokio semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<ConcurrencySlot, DispatchError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;
        Ok(ConcurrencySlot { permit })
    }
}

/// A held slot. Dropping it releases the slot, including during unwinding.
#[derive(Debug)]
pub struct ConcurrencySlot {
    permit: OwnedSemaphorePermit,
}

impl ConcurrencySlot {
    /// Release the slot now.
    pub fn release(self) {
        drop(self.permit);
    }
}
