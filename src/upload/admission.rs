use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounds how many parts are in flight at once.
///
/// Owned by one upload call and shared with its workers; a part holds an
/// [`AdmissionPermit`] from submission until its worker finishes.
#[derive(Debug)]
pub struct AdmissionControl {
    limit: usize,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Slot for one in-flight part. Dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    control: Arc<AdmissionControl>,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionControl {
    pub fn new(limit: usize) -> Arc<Self> {
        let limit = limit.max(1);
        Arc::new(AdmissionControl {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Wait for a free slot. The semaphore is private and never closed, so
    /// this only fails if tokio reports it closed.
    pub async fn admit(self: &Arc<Self>) -> Result<AdmissionPermit, AcquireError> {
        let permit = Arc::clone(&self.permits).acquire_owned().await?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        Ok(AdmissionPermit {
            control: Arc::clone(self),
            _permit: permit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count seen so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Runs before the semaphore permit field is released
        self.control.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
