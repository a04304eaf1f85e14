use std::sync::{Mutex, PoisonError};

use log::debug;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::PartUploadError;

/// Single-slot channel carrying the first fatal part failure from any worker
/// to the coordinator.
///
/// The first report wins; later reports are dropped because the transaction
/// is aborted on the first one anyway. Reporting also trips a cancellation
/// token so in-flight siblings and the submission loop notice right away.
pub struct ErrorAggregator {
    slot: Mutex<Option<PartUploadError>>,
    tripped: CancellationToken,
}

impl ErrorAggregator {
    /// `tripped` is cancelled on the first report; pass a child of the
    /// upload's cancellation token to stop the workers with it.
    pub fn new(tripped: CancellationToken) -> Self {
        ErrorAggregator {
            slot: Mutex::new(None),
            tripped,
        }
    }

    /// Record `err` if no error is held yet. Returns whether it was kept.
    pub fn report(&self, err: PartUploadError) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let kept = if slot.is_none() {
            *slot = Some(err);
            true
        } else {
            debug!("Dropping additional part failure: {}", err);
            false
        };
        drop(slot);

        self.tripped.cancel();
        kept
    }

    /// Propagate the held error, if any, emptying the slot
    pub fn check(&self) -> Result<(), PartUploadError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once a failure has been reported or the token was cancelled
    pub fn tripped(&self) -> WaitForCancellationFuture<'_> {
        self.tripped.cancelled()
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use std::sync::Arc;
    use std::time::Duration;

    fn failure(part_number: u32) -> PartUploadError {
        PartUploadError {
            part_number,
            worker: "worker".to_string(),
            attempts: 5,
            source: BackendError::transport("boom"),
        }
    }

    #[test]
    fn test_first_report_wins() {
        let aggregator = ErrorAggregator::new(CancellationToken::new());

        assert!(aggregator.report(failure(3)));
        assert!(!aggregator.report(failure(1)));

        let err = aggregator.check().unwrap_err();
        assert_eq!(err.part_number, 3);
        // Drained
        assert!(aggregator.check().is_ok());
    }

    #[test]
    fn test_check_without_error_is_noop() {
        let aggregator = ErrorAggregator::new(CancellationToken::new());
        assert!(aggregator.check().is_ok());
        assert!(!aggregator.is_tripped());
    }

    #[test]
    fn test_report_cancels_token() {
        let token = CancellationToken::new();
        let aggregator = ErrorAggregator::new(token.child_token());
        aggregator.report(failure(1));

        assert!(aggregator.is_tripped());
        // The parent is untouched
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_tripped_wakes_waiter() {
        let aggregator = Arc::new(ErrorAggregator::new(CancellationToken::new()));

        let reporter = Arc::clone(&aggregator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reporter.report(failure(7));
        });

        tokio::time::timeout(Duration::from_secs(5), aggregator.tripped())
            .await
            .expect("waiter should be woken by the report");
        assert_eq!(aggregator.check().unwrap_err().part_number, 7);
    }

    #[test]
    fn test_concurrent_reports_keep_exactly_one() {
        let aggregator = Arc::new(ErrorAggregator::new(CancellationToken::new()));

        let handles: Vec<_> = (1..=8).map(|i| {
            let aggregator = Arc::clone(&aggregator);
            std::thread::spawn(move || aggregator.report(failure(i)))
        }).collect();

        let kept = handles.into_iter()
            .map(|h| h.join().unwrap())
            .filter(|kept| *kept)
            .count();

        assert_eq!(kept, 1);
        assert!(aggregator.check().is_err());
        assert!(aggregator.check().is_ok());
    }
}
