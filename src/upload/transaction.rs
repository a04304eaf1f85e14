use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::cloud::backend::MultipartBackend;
use crate::error::{PreconditionError, TransactionAbortError, UploadFailure};
use crate::models::{UploadHandle, UploadSummary, UploadedPart};
use crate::upload::admission::AdmissionControl;
use crate::upload::aggregator::ErrorAggregator;
use crate::upload::chunker::{Chunker, UploadSource};
use crate::upload::coordinator::UploadCoordinator;
use crate::upload::options::UploadOptions;
use crate::upload::part::PartUploader;

/// An initiated multipart upload that must end completed or aborted.
///
/// `complete` and `abort` consume the transaction, so each can run at most
/// once. A transaction dropped without either (a cancelled future, a panic)
/// schedules a best-effort abort on the current runtime.
pub struct Transaction {
    backend: Arc<dyn MultipartBackend>,
    handle: UploadHandle,
    finished: bool,
}

impl Transaction {
    /// Start a multipart upload for `key`
    pub async fn initiate(backend: Arc<dyn MultipartBackend>, key: &str) -> Result<Self, UploadFailure> {
        let handle = backend.initiate(key).await
            .map_err(|source| UploadFailure::Initiate { key: key.to_string(), source })?;

        info!("Initiated multipart upload {} for {}", handle.upload_id, key);
        Ok(Transaction {
            backend,
            handle,
            finished: false,
        })
    }

    pub fn handle(&self) -> &UploadHandle {
        &self.handle
    }

    /// Commit `parts`. If the commit fails the upload is aborted and the
    /// commit error returned.
    pub async fn complete(mut self, parts: Vec<UploadedPart>) -> Result<(), UploadFailure> {
        match self.backend.complete(&self.handle, parts).await {
            Ok(()) => {
                self.finished = true;
                info!("Completed multipart upload {} for {}", self.handle.upload_id, self.handle.key);
                Ok(())
            }
            Err(source) => {
                let cause = UploadFailure::Commit {
                    upload_id: self.handle.upload_id.clone(),
                    source,
                };
                Err(self.abort(cause).await)
            }
        }
    }

    /// Abort the upload and hand back `cause`. A failing abort is logged and
    /// never replaces `cause`.
    pub async fn abort(mut self, cause: UploadFailure) -> UploadFailure {
        warn!("Aborting multipart upload {} for {}: {}", self.handle.upload_id, self.handle.key, cause);

        let result = self.backend.abort(&self.handle).await;
        // Only now: if this future is dropped mid-abort, Drop still aborts
        self.finished = true;

        if let Err(source) = result {
            let err = TransactionAbortError {
                upload_id: self.handle.upload_id.clone(),
                source,
            };
            error!("{}", err);
        }

        cause
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Multipart upload {} dropped while open, aborting", self.handle.upload_id);
                let backend = Arc::clone(&self.backend);
                let handle = self.handle.clone();
                runtime.spawn(async move {
                    if let Err(source) = backend.abort(&handle).await {
                        error!("{}", TransactionAbortError { upload_id: handle.upload_id.clone(), source });
                    }
                });
            }
            Err(_) => {
                error!("Multipart upload {} dropped outside a runtime and left open", self.handle.upload_id);
            }
        }
    }
}

/// Upload `source` to `key` as one multipart transaction.
///
/// The source is split into `options.chunk_size` parts which are uploaded
/// with at most `options.threads` in flight. The object is committed only if
/// every part succeeds; on any fatal failure the transaction is aborted and
/// the original failure returned.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use rust_s3upload::cloud::memory::MemoryBackend;
/// # use rust_s3upload::upload::{upload, UploadOptions, UploadSource};
/// # async fn example() -> anyhow::Result<()> {
/// let backend = Arc::new(MemoryBackend::new());
/// let source = UploadSource::reader(tokio::io::stdin());
///
/// let summary = upload(backend, source, "backups/db.tar", UploadOptions::default()).await?;
/// println!("Uploaded {} bytes in {} parts", summary.bytes, summary.parts);
/// # Ok(())
/// # }
/// ```
pub async fn upload(
    backend: Arc<dyn MultipartBackend>,
    source: UploadSource,
    key: &str,
    options: UploadOptions,
) -> Result<UploadSummary, UploadFailure> {
    let started = Instant::now();
    options.validate(backend.min_part_size())?;

    if !options.overwrite {
        let exists = backend.exists(key).await
            .map_err(|source| UploadFailure::Lookup { key: key.to_string(), source })?;
        if exists {
            return Err(PreconditionError::KeyExists(key.to_string()).into());
        }
    }

    let cancel = options.cancel.as_ref()
        .map(CancellationToken::child_token)
        .unwrap_or_default();

    // Read the first part up front so an empty source never opens a transaction
    let mut chunker = Chunker::new(source, options.chunk_size, options.max_parts);
    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UploadFailure::Cancelled),
        first = chunker.peek() => first?.is_some(),
    };
    if !first {
        return Err(PreconditionError::EmptySource.into());
    }

    let transaction = Transaction::initiate(Arc::clone(&backend), key).await?;

    let uploader = PartUploader::new(Arc::clone(&backend), transaction.handle().clone(), cancel.clone())
        .with_retry(options.retry)
        .with_progress(options.progress.clone(), options.progress_callbacks_per_part);
    let coordinator = UploadCoordinator::new(
        uploader,
        AdmissionControl::new(options.threads),
        Arc::new(ErrorAggregator::new(cancel.clone())),
        cancel,
    );

    let parts = match coordinator.run(&mut chunker).await {
        Ok(parts) => parts,
        Err(cause) => return Err(transaction.abort(cause).await),
    };

    let part_count = parts.len() as u32;
    let bytes = parts.iter().map(|part| part.size).sum();
    let upload_id = transaction.handle().upload_id.clone();

    transaction.complete(parts).await?;

    Ok(UploadSummary {
        key: key.to_string(),
        upload_id,
        parts: part_count,
        bytes,
        threads: options.threads,
        elapsed_ms: started.elapsed().as_millis() as u64,
        completed_at: Utc::now().to_rfc3339(),
    })
}
