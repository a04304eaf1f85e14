use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_THREADS, PROGRESS_CALLBACKS_PER_PART, S3_MAX_PARTS, S3_MAX_PART_SIZE,
};
use crate::error::PreconditionError;
use crate::models::ProgressFn;
use crate::upload::part::RetryPolicy;

/// Tunables for a single `upload()` call.
#[derive(Clone)]
pub struct UploadOptions {
    /// Maximum number of parts in flight
    pub threads: usize,
    /// Replace an existing object instead of failing
    pub overwrite: bool,
    /// Size of every part except the last
    pub chunk_size: usize,
    pub progress: Option<ProgressFn>,
    pub retry: RetryPolicy,
    /// Parts allowed per upload before the source is rejected
    pub max_parts: u32,
    /// Hint for how often the backend reports progress within one part
    pub progress_callbacks_per_part: u32,
    /// Cancelling this token aborts the upload
    pub cancel: Option<CancellationToken>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            threads: DEFAULT_THREADS,
            overwrite: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: None,
            retry: RetryPolicy::default(),
            max_parts: S3_MAX_PARTS,
            progress_callbacks_per_part: PROGRESS_CALLBACKS_PER_PART,
            cancel: None,
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("threads", &self.threads)
            .field("overwrite", &self.overwrite)
            .field("chunk_size", &self.chunk_size)
            .field("progress", &self.progress.is_some())
            .field("retry", &self.retry)
            .field("max_parts", &self.max_parts)
            .field("progress_callbacks_per_part", &self.progress_callbacks_per_part)
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

impl UploadOptions {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Check the options against the backend's part size floor
    pub fn validate(&self, min_part_size: usize) -> Result<(), PreconditionError> {
        if self.threads == 0 {
            return Err(PreconditionError::InvalidOptions("threads must be at least 1".to_string()));
        }
        if self.chunk_size < min_part_size {
            return Err(PreconditionError::InvalidOptions(format!(
                "chunk size {} is below the backend minimum part size {}",
                self.chunk_size, min_part_size
            )));
        }
        if self.chunk_size as u64 > S3_MAX_PART_SIZE {
            return Err(PreconditionError::InvalidOptions(format!(
                "chunk size {} is above the maximum part size {}",
                self.chunk_size, S3_MAX_PART_SIZE
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(PreconditionError::InvalidOptions("max attempts must be at least 1".to_string()));
        }
        if self.max_parts == 0 {
            return Err(PreconditionError::InvalidOptions("max parts must be at least 1".to_string()));
        }
        Ok(())
    }
}
