use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::cloud::backend::MultipartBackend;
use crate::constants::{MAX_PART_ATTEMPTS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS, PROGRESS_CALLBACKS_PER_PART};
use crate::error::PartUploadError;
use crate::models::{Part, PartProgress, ProgressFn, UploadHandle, UploadedPart};

/// How often a part is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt, doubled after each further one.
    /// Zero retries immediately.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: MAX_PART_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_secs(RETRY_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }
}

/// Terminal result of uploading one part. Returned as a value so the
/// coordinator can aggregate failures without unwinding.
#[derive(Debug)]
pub enum PartOutcome {
    Uploaded(UploadedPart),
    Failed(PartUploadError),
    /// The upload was cancelled before this part finished
    Cancelled(u32),
}

/// Uploads single parts of one multipart transaction, retrying each part
/// up to the policy's attempt budget.
pub struct PartUploader {
    backend: Arc<dyn MultipartBackend>,
    handle: UploadHandle,
    retry: RetryPolicy,
    progress: Option<ProgressFn>,
    callbacks_per_part: u32,
    cancel: CancellationToken,
}

impl PartUploader {
    pub fn new(backend: Arc<dyn MultipartBackend>, handle: UploadHandle, cancel: CancellationToken) -> Self {
        PartUploader {
            backend,
            handle,
            retry: RetryPolicy::default(),
            progress: None,
            callbacks_per_part: PROGRESS_CALLBACKS_PER_PART,
            cancel,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressFn>, callbacks_per_part: u32) -> Self {
        self.progress = progress;
        self.callbacks_per_part = callbacks_per_part;
        self
    }

    /// Upload `part`, consuming it. The buffer is released when this returns,
    /// whatever the outcome.
    pub async fn upload(&self, part: Part) -> PartOutcome {
        let Part { number, data } = part;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if self.cancel.is_cancelled() {
                return PartOutcome::Cancelled(number);
            }

            let progress = self.progress.as_ref()
                .map(|callback| PartProgress::new(number, self.callbacks_per_part, Arc::clone(callback)));

            debug!("Uploading part {} ({} bytes), attempt {}/{}", number, data.len(), attempt, max_attempts);

            // Bytes clones share the buffer, so every attempt resends the part from its first byte
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return PartOutcome::Cancelled(number),
                result = self.backend.upload_part(&self.handle, number, data.clone(), progress) => result,
            };

            match result {
                Ok(uploaded) => return PartOutcome::Uploaded(uploaded),
                Err(e) if attempt >= max_attempts => {
                    return PartOutcome::Failed(PartUploadError {
                        part_number: number,
                        worker: worker_identity(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!("Part {} upload attempt {} failed, retrying in {:?}: {}", number, attempt, delay, e);

                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return PartOutcome::Cancelled(number),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}

fn worker_identity() -> String {
    let thread = std::thread::current();
    format!("{} ({:?})", thread.name().unwrap_or("unnamed"), thread.id())
}
