use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use log::debug;
use rusoto_core::{ByteStream, RusotoError};
use rusoto_s3::{
    S3Client, S3,
    HeadObjectRequest, HeadObjectError,
    CreateMultipartUploadRequest, UploadPartRequest, CompleteMultipartUploadRequest,
    CompletedPart as S3CompletedPart, CompletedMultipartUpload, AbortMultipartUploadRequest
};

use crate::cloud::backend::MultipartBackend;
use crate::error::BackendError;
use crate::models::{PartProgress, UploadHandle, UploadedPart};

/// Multipart backend for a single Amazon S3 (or S3-compatible) bucket.
///
/// # Fields
///
/// * `client` - Shared S3 client instance
/// * `bucket` - The S3 bucket name
pub struct S3Backend {
    client: Arc<S3Client>,
    bucket: String,
}

impl S3Backend {
    /// Create a backend for `bucket`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use rust_s3upload::cloud::client::{create_s3_client, S3ClientConfig};
    /// # use rust_s3upload::cloud::s3::S3Backend;
    /// # fn example() -> anyhow::Result<()> {
    /// let client = create_s3_client(&S3ClientConfig::default())?;
    /// let backend = S3Backend::new(client, "my-bucket");
    /// assert_eq!(backend.bucket(), "my-bucket");
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(client: Arc<S3Client>, bucket: &str) -> Self {
        S3Backend {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Map a rusoto error onto the transport/server split the engine works with
pub fn classify_error<E: std::error::Error + 'static>(err: RusotoError<E>) -> BackendError {
    match err {
        RusotoError::HttpDispatch(e) => BackendError::transport(e.to_string()),
        RusotoError::Credentials(e) => BackendError::transport(format!("credentials: {}", e)),
        RusotoError::Blocking => BackendError::transport("blocking runtime error"),
        RusotoError::Unknown(response) => BackendError::server(
            Some(response.status.as_u16()),
            response.body_as_str().to_string(),
        ),
        other => BackendError::server(None, other.to_string()),
    }
}

/// Build the request body, reporting progress as each slice is consumed
fn progress_body(body: Bytes, progress: Option<PartProgress>) -> ByteStream {
    let total = body.len();

    let Some(progress) = progress else {
        return ByteStream::new_with_size(stream::iter(std::iter::once(Ok::<_, io::Error>(body))), total);
    };

    let mut slices = Vec::new();
    let mut offset = 0;
    for len in progress.slice_lengths(total) {
        slices.push(body.slice(offset..offset + len));
        offset += len;
    }

    let mut done = 0u64;
    let slices = slices.into_iter().map(move |slice| {
        done += slice.len() as u64;
        progress.report(done, total as u64);
        Ok::<_, io::Error>(slice)
    });

    ByteStream::new_with_size(stream::iter(slices), total)
}

#[async_trait]
impl MultipartBackend for S3Backend {
    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let request = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        match self.client.head_object(request).await {
            Ok(_) => Ok(true),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => Ok(false),
            // HEAD responses carry no body, so a missing key usually surfaces as a bare 404
            Err(RusotoError::Unknown(ref response)) if response.status.as_u16() == 404 => Ok(false),
            Err(e) => Err(classify_error(e)),
        }
    }

    async fn initiate(&self, key: &str) -> Result<UploadHandle, BackendError> {
        let output = self.client.create_multipart_upload(CreateMultipartUploadRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        }).await.map_err(classify_error)?;

        let upload_id = output.upload_id
            .ok_or_else(|| BackendError::server(None, "No upload ID returned from S3"))?;

        debug!("Started multipart upload with ID: {} for s3://{}/{}", upload_id, self.bucket, key);

        Ok(UploadHandle {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        handle: &UploadHandle,
        part_number: u32,
        body: Bytes,
        progress: Option<PartProgress>,
    ) -> Result<UploadedPart, BackendError> {
        let size = body.len() as u64;

        let request = UploadPartRequest {
            bucket: self.bucket.clone(),
            key: handle.key.clone(),
            upload_id: handle.upload_id.clone(),
            part_number: part_number as i64,
            content_length: Some(size as i64),
            body: Some(progress_body(body, progress)),
            ..Default::default()
        };

        let output = self.client.upload_part(request).await.map_err(classify_error)?;
        let etag = output.e_tag
            .ok_or_else(|| BackendError::server(None, "No ETag in upload part response"))?;

        Ok(UploadedPart {
            part_number,
            etag,
            size,
        })
    }

    async fn complete(&self, handle: &UploadHandle, parts: Vec<UploadedPart>) -> Result<(), BackendError> {
        let parts = parts.into_iter()
            .map(|part| S3CompletedPart {
                e_tag: Some(part.etag),
                part_number: Some(part.part_number as i64),
            })
            .collect();

        let request = CompleteMultipartUploadRequest {
            bucket: self.bucket.clone(),
            key: handle.key.clone(),
            upload_id: handle.upload_id.clone(),
            multipart_upload: Some(CompletedMultipartUpload {
                parts: Some(parts),
            }),
            ..Default::default()
        };

        self.client.complete_multipart_upload(request).await.map_err(classify_error)?;
        debug!("Completed multipart upload for s3://{}/{}", self.bucket, handle.key);
        Ok(())
    }

    async fn abort(&self, handle: &UploadHandle) -> Result<(), BackendError> {
        let request = AbortMultipartUploadRequest {
            bucket: self.bucket.clone(),
            key: handle.key.clone(),
            upload_id: handle.upload_id.clone(),
            ..Default::default()
        };

        self.client.abort_multipart_upload(request).await.map_err(classify_error)?;
        debug!("Aborted multipart upload for s3://{}/{}", self.bucket, handle.key);
        Ok(())
    }
}
