use async_trait::async_trait;
use bytes::Bytes;

use crate::constants::S3_MIN_PART_SIZE;
use crate::error::BackendError;
use crate::models::{PartProgress, UploadHandle, UploadedPart};

/// A trait for object stores that expose multipart upload semantics.
///
/// This trait abstracts over different destinations like S3, S3-compatible
/// services or the in-memory store, so the upload engine only deals with
/// initiate / upload part / complete / abort.
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    /// Smallest size the backend accepts for any part except the last
    fn min_part_size(&self) -> usize {
        S3_MIN_PART_SIZE
    }

    /// Check whether an object already exists under `key`
    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Start a multipart upload for `key`
    async fn initiate(&self, key: &str) -> Result<UploadHandle, BackendError>;

    /// Upload one part. `body` is the whole part and can be resent as-is.
    async fn upload_part(
        &self,
        handle: &UploadHandle,
        part_number: u32,
        body: Bytes,
        progress: Option<PartProgress>,
    ) -> Result<UploadedPart, BackendError>;

    /// Commit the upload. `parts` is sorted by part number.
    async fn complete(&self, handle: &UploadHandle, parts: Vec<UploadedPart>) -> Result<(), BackendError>;

    /// Discard the upload and every part uploaded under it
    async fn abort(&self, handle: &UploadHandle) -> Result<(), BackendError>;
}
