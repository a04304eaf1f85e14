//! In-process multipart backend.
//!
//! Enforces the same multipart rules S3 does (part size floor, contiguous
//! part numbers, no parts after abort) and keeps per-method call counts.
//! Failures and latency can be injected, which makes it the backend of
//! choice for exercising the upload engine without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::debug;
use uuid::Uuid;

use crate::cloud::backend::MultipartBackend;
use crate::constants::S3_MIN_PART_SIZE;
use crate::error::BackendError;
use crate::models::{PartProgress, UploadHandle, UploadedPart};

/// Number of calls made to each backend method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub exists: usize,
    pub initiate: usize,
    pub upload_part: usize,
    pub complete: usize,
    pub abort: usize,
}

impl CallCounts {
    /// Calls that belong to a multipart transaction (everything but `exists`)
    pub fn multipart_calls(&self) -> usize {
        self.initiate + self.upload_part + self.complete + self.abort
    }
}

#[derive(Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
    /// Remaining injected failures per part number
    part_faults: HashMap<u32, u32>,
    calls: CallCounts,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    min_part_size: usize,
    part_latency: Option<Duration>,
    fail_complete: AtomicBool,
    fail_abort: AtomicBool,
    active_parts: AtomicUsize,
    peak_parts: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active part counter when an upload_part call ends
struct ActivePart<'a>(&'a AtomicUsize);

impl Drop for ActivePart<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            state: Mutex::new(State::default()),
            min_part_size: S3_MIN_PART_SIZE,
            part_latency: None,
            fail_complete: AtomicBool::new(false),
            fail_abort: AtomicBool::new(false),
            active_parts: AtomicUsize::new(0),
            peak_parts: AtomicUsize::new(0),
        }
    }

    /// Accept smaller parts, so tests can work with tiny payloads
    pub fn with_min_part_size(mut self, min_part_size: usize) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Make every upload_part call take at least `latency`
    pub fn with_part_latency(mut self, latency: Duration) -> Self {
        self.part_latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `times` upload attempts of `part_number`
    pub fn fail_part(&self, part_number: u32, times: u32) {
        self.state().part_faults.insert(part_number, times);
    }

    pub fn fail_complete(&self) {
        self.fail_complete.store(true, Ordering::SeqCst);
    }

    pub fn fail_abort(&self) {
        self.fail_abort.store(true, Ordering::SeqCst);
    }

    pub fn insert_object(&self, key: &str, data: Bytes) {
        self.state().objects.insert(key.to_string(), data);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Multipart uploads that were initiated but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Highest number of upload_part calls observed running at once
    pub fn peak_concurrent_parts(&self) -> usize {
        self.peak_parts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MultipartBackend for MemoryBackend {
    fn min_part_size(&self) -> usize {
        self.min_part_size
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut state = self.state();
        state.calls.exists += 1;
        Ok(state.objects.contains_key(key))
    }

    async fn initiate(&self, key: &str) -> Result<UploadHandle, BackendError> {
        let upload_id = Uuid::new_v4().to_string();

        let mut state = self.state();
        state.calls.initiate += 1;
        state.uploads.insert(upload_id.clone(), PendingUpload {
            key: key.to_string(),
            parts: BTreeMap::new(),
        });

        debug!("Initiated in-memory upload {} for {}", upload_id, key);
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
        let active = self.active_parts.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActivePart(&self.active_parts);
        self.peak_parts.fetch_max(active, Ordering::SeqCst);

        {
            let mut state = self.state();
            state.calls.upload_part += 1;

            if let Some(remaining) = state.part_faults.get_mut(&part_number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BackendError::transport(format!(
                        "injected failure for part {}", part_number
                    )));
                }
            }
        }

        if let Some(latency) = self.part_latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(progress) = &progress {
            let total = body.len() as u64;
            let mut done = 0u64;
            for len in progress.slice_lengths(body.len()) {
                done += len as u64;
                progress.report(done, total);
            }
        }

        let mut state = self.state();
        let upload = state.uploads.get_mut(&handle.upload_id)
            .ok_or_else(|| BackendError::server(Some(404), format!("NoSuchUpload: {}", handle.upload_id)))?;

        let size = body.len() as u64;
        let etag = format!("\"{:x}-{}\"", size, part_number);
        upload.parts.insert(part_number, body);

        Ok(UploadedPart {
            part_number,
            etag,
            size,
        })
    }

    async fn complete(&self, handle: &UploadHandle, parts: Vec<UploadedPart>) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.complete += 1;

        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(BackendError::server(Some(500), "injected complete failure"));
        }

        let upload = state.uploads.get(&handle.upload_id)
            .ok_or_else(|| BackendError::server(Some(404), format!("NoSuchUpload: {}", handle.upload_id)))?;

        let mut assembled = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            if part.part_number as usize != index + 1 {
                return Err(BackendError::server(Some(400), format!(
                    "InvalidPartOrder: expected part {}, got {}", index + 1, part.part_number
                )));
            }
            let data = upload.parts.get(&part.part_number)
                .ok_or_else(|| BackendError::server(Some(400), format!("InvalidPart: {}", part.part_number)))?;
            let is_last = index + 1 == parts.len();
            if !is_last && data.len() < self.min_part_size {
                return Err(BackendError::server(Some(400), format!(
                    "EntityTooSmall: part {} is {} bytes", part.part_number, data.len()
                )));
            }
            assembled.extend_from_slice(data);
        }

        let key = upload.key.clone();
        state.uploads.remove(&handle.upload_id);
        state.objects.insert(key, assembled.freeze());
        Ok(())
    }

    async fn abort(&self, handle: &UploadHandle) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.abort += 1;

        if self.fail_abort.load(Ordering::SeqCst) {
            return Err(BackendError::transport("injected abort failure"));
        }

        state.uploads.remove(&handle.upload_id)
            .map(|_| ())
            .ok_or_else(|| BackendError::server(Some(404), format!("NoSuchUpload: {}", handle.upload_id)))
    }
}
