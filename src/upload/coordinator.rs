use std::sync::Arc;

use log::{debug, error, info};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::UploadFailure;
use crate::models::UploadedPart;
use crate::upload::admission::AdmissionControl;
use crate::upload::aggregator::ErrorAggregator;
use crate::upload::chunker::Chunker;
use crate::upload::part::{PartOutcome, PartUploader};

/// What a worker hands back once its part is done
enum Finished {
    Uploaded(UploadedPart),
    /// Failed (already reported to the aggregator) or cancelled
    Stopped,
}

/// Fans parts out to concurrent workers under admission control and decides
/// whether the transaction may be committed.
///
/// Parts are submitted in source order and may finish in any order. The
/// first fatal part failure stops new submissions, cancels in-flight
/// siblings and becomes the result of [`run`](Self::run). Every worker is
/// joined before `run` returns.
pub struct UploadCoordinator {
    uploader: Arc<PartUploader>,
    admission: Arc<AdmissionControl>,
    errors: Arc<ErrorAggregator>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    /// `cancel` must be the token the uploader and the aggregator were built with
    pub fn new(
        uploader: PartUploader,
        admission: Arc<AdmissionControl>,
        errors: Arc<ErrorAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        UploadCoordinator {
            uploader: Arc::new(uploader),
            admission,
            errors,
            cancel,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    /// Upload every part `chunker` produces. Returns the uploaded parts
    /// sorted by part number, or the first fatal failure.
    pub async fn run(&self, chunker: &mut Chunker) -> Result<Vec<UploadedPart>, UploadFailure> {
        let mut workers = JoinSet::new();
        let mut uploaded = Vec::new();

        info!("Uploading parts with up to {} in flight", self.admission.limit());

        let submitted = self.submit_all(chunker, &mut workers, &mut uploaded).await;
        if submitted.is_err() {
            self.cancel.cancel();
        }

        let drained = self.drain(&mut workers, &mut uploaded).await;
        let submitted = submitted?;
        drained?;

        // A failure can land after the last submission
        self.errors.check()?;
        if self.cancel.is_cancelled() {
            return Err(UploadFailure::Cancelled);
        }

        if uploaded.len() != submitted as usize {
            return Err(UploadFailure::Worker(format!(
                "{} of {} parts reported success", uploaded.len(), submitted
            )));
        }

        uploaded.sort_by_key(|part| part.part_number);
        info!("All {} parts uploaded (peak {} in flight)", submitted, self.admission.peak());
        Ok(uploaded)
    }

    async fn submit_all(
        &self,
        chunker: &mut Chunker,
        workers: &mut JoinSet<Finished>,
        uploaded: &mut Vec<UploadedPart>,
    ) -> Result<u32, UploadFailure> {
        let mut submitted = 0u32;

        loop {
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = self.errors.tripped() => return Err(self.stop_cause()),
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        self.reap(joined, uploaded)?;
                    }
                    permit = self.admission.admit() => {
                        break permit.map_err(|e| UploadFailure::Worker(e.to_string()))?;
                    }
                }
            };

            // A blocked source read must not hide a failure or a cancel
            let next = tokio::select! {
                biased;
                _ = self.errors.tripped() => return Err(self.stop_cause()),
                next = chunker.next_part() => next?,
            };
            let Some(part) = next else {
                break;
            };

            submitted += 1;
            debug!("Submitting part {} ({} in flight)", part.number, self.admission.in_flight());

            let uploader = Arc::clone(&self.uploader);
            let errors = Arc::clone(&self.errors);
            workers.spawn(async move {
                let _permit = permit;
                match uploader.upload(part).await {
                    PartOutcome::Uploaded(part) => Finished::Uploaded(part),
                    PartOutcome::Failed(err) => {
                        error!("Part upload failed: {}", err);
                        errors.report(err);
                        Finished::Stopped
                    }
                    PartOutcome::Cancelled(number) => {
                        debug!("Part {} cancelled", number);
                        Finished::Stopped
                    }
                }
            });
        }

        Ok(submitted)
    }

    /// Join every remaining worker, keeping the first worker crash
    async fn drain(
        &self,
        workers: &mut JoinSet<Finished>,
        uploaded: &mut Vec<UploadedPart>,
    ) -> Result<(), UploadFailure> {
        let mut first_failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(failure) = self.reap(joined, uploaded) {
                first_failure.get_or_insert(failure);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    fn reap(
        &self,
        joined: Result<Finished, JoinError>,
        uploaded: &mut Vec<UploadedPart>,
    ) -> Result<(), UploadFailure> {
        match joined {
            Ok(Finished::Uploaded(part)) => {
                uploaded.push(part);
                Ok(())
            }
            Ok(Finished::Stopped) => Ok(()),
            Err(e) => {
                error!("Upload worker crashed: {}", e);
                self.cancel.cancel();
                Err(UploadFailure::Worker(e.to_string()))
            }
        }
    }

    /// Why the aggregator tripped: a part failure, or outside cancellation
    fn stop_cause(&self) -> UploadFailure {
        match self.errors.check() {
            Err(err) => UploadFailure::PartUpload(err),
            Ok(()) => UploadFailure::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::backend::MultipartBackend;
    use crate::cloud::memory::MemoryBackend;
    use crate::upload::chunker::UploadSource;
    use crate::upload::part::RetryPolicy;
    use bytes::Bytes;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, ReadBuf};

    struct Harness {
        backend: Arc<MemoryBackend>,
        coordinator: UploadCoordinator,
        cancel: CancellationToken,
    }

    async fn harness(backend: MemoryBackend, threads: usize) -> Harness {
        let backend = Arc::new(backend);
        let handle = backend.initiate("obj").await.unwrap();
        let cancel = CancellationToken::new();
        let dyn_backend: Arc<dyn MultipartBackend> = backend.clone();
        let uploader = PartUploader::new(dyn_backend, handle, cancel.clone())
            .with_retry(RetryPolicy::immediate(5));
        let coordinator = UploadCoordinator::new(
            uploader,
            AdmissionControl::new(threads),
            Arc::new(ErrorAggregator::new(cancel.clone())),
            cancel.clone(),
        );
        Harness { backend, coordinator, cancel }
    }

    fn chunker(bytes: usize, chunk_size: usize) -> Chunker {
        let data: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
        Chunker::new(UploadSource::reader(Cursor::new(data)), chunk_size, 10_000)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_parts_uploaded_in_order() {
        let h = harness(
            MemoryBackend::new().with_min_part_size(1).with_part_latency(Duration::from_millis(5)),
            3,
        ).await;

        let parts = h.coordinator.run(&mut chunker(100, 10)).await.unwrap();
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();

        assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
        assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_threads() {
        let h = harness(
            MemoryBackend::new().with_min_part_size(1).with_part_latency(Duration::from_millis(10)),
            2,
        ).await;

        h.coordinator.run(&mut chunker(200, 10)).await.unwrap();

        assert!(h.coordinator.admission().peak() <= 2);
        assert!(h.backend.peak_concurrent_parts() <= 2);
        assert_eq!(h.coordinator.admission().in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_stops_new_submissions() {
        let h = harness(
            MemoryBackend::new().with_min_part_size(1).with_part_latency(Duration::from_millis(5)),
            1,
        ).await;
        h.backend.fail_part(1, 5);

        let err = h.coordinator.run(&mut chunker(1000, 10)).await.unwrap_err();

        match err {
            UploadFailure::PartUpload(e) => assert_eq!(e.part_number, 1),
            other => panic!("expected part failure, got {:?}", other),
        }
        // Part 1 used all five attempts; at most one more part got admitted
        assert!(h.backend.calls().upload_part <= 6);
        assert!(h.cancel.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_transient_failures_are_absorbed() {
        let h = harness(MemoryBackend::new().with_min_part_size(1), 4).await;
        h.backend.fail_part(2, 4);
        h.backend.fail_part(5, 1);

        let parts = h.coordinator.run(&mut chunker(60, 10)).await.unwrap();
        assert_eq!(parts.len(), 6);
    }

    #[tokio::test]
    async fn test_external_cancel() {
        let h = harness(
            MemoryBackend::new().with_min_part_size(1).with_part_latency(Duration::from_secs(30)),
            2,
        ).await;

        let trigger = h.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            h.coordinator.run(&mut chunker(100, 10)),
        ).await.expect("cancellation should end the run");

        assert!(matches!(result, Err(UploadFailure::Cancelled)));
        assert_eq!(h.coordinator.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_source_error_cancels_workers() {
        let h = harness(
            MemoryBackend::new().with_min_part_size(1).with_part_latency(Duration::from_secs(30)),
            4,
        ).await;

        let reader = tokio_test::io::Builder::new()
            .read(&[1u8; 10])
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            .build();
        let mut chunker = Chunker::new(UploadSource::reader(reader), 10, 100);

        let result = tokio::time::timeout(Duration::from_secs(5), h.coordinator.run(&mut chunker))
            .await
            .expect("source failure should end the run");

        assert!(matches!(result, Err(UploadFailure::Source(_))));
    }

    /// Yields `first` once, then never makes progress again
    struct Stalled {
        first: Option<Vec<u8>>,
    }

    impl AsyncRead for Stalled {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.first.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Pending,
            }
        }
    }

    fn stalled_chunker() -> Chunker {
        let reader = Stalled { first: Some(vec![9u8; 10]) };
        Chunker::new(UploadSource::reader(reader), 10, 100)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_seen_while_source_is_blocked() {
        let h = harness(MemoryBackend::new().with_min_part_size(1), 4).await;
        h.backend.fail_part(1, 5);

        let result = tokio::time::timeout(Duration::from_secs(5), h.coordinator.run(&mut stalled_chunker()))
            .await
            .expect("part failure should end the run while the source is blocked");

        match result {
            Err(UploadFailure::PartUpload(e)) => assert_eq!(e.part_number, 1),
            other => panic!("expected part failure, got {:?}", other),
        }
        assert_eq!(h.backend.calls().upload_part, 5);
    }

    #[tokio::test]
    async fn test_cancel_seen_while_source_is_blocked() {
        let h = harness(MemoryBackend::new().with_min_part_size(1), 4).await;

        let trigger = h.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), h.coordinator.run(&mut stalled_chunker()))
            .await
            .expect("cancellation should end the run while the source is blocked");

        assert!(matches!(result, Err(UploadFailure::Cancelled)));
        assert_eq!(h.coordinator.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_single_fragment_part() {
        let h = harness(MemoryBackend::new().with_min_part_size(1), 5).await;
        let mut chunker = Chunker::new(UploadSource::fragments(vec![Bytes::from_static(b"tiny")]), 10, 100);

        let parts = h.coordinator.run(&mut chunker).await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size, 4);
    }
}
