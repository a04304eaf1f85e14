use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, Deserialize};

/// Progress callback: `(part_number, bytes_done, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u32, u64, u64) + Send + Sync>;

/// One contiguous slice of the source, numbered from 1 in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub number: u32,
    pub data: Bytes,
}

impl Part {
    pub fn new(number: u32, data: Bytes) -> Self {
        Part { number, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Backend-side identity of an initiated multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHandle {
    pub key: String,
    pub upload_id: String,
}

/// Receipt for a part the backend accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Progress reporting handed to the backend for a single part.
///
/// The backend decides when to report; `num_callbacks` is only a hint for
/// how often.
#[derive(Clone)]
pub struct PartProgress {
    pub part_number: u32,
    pub num_callbacks: u32,
    callback: ProgressFn,
}

impl PartProgress {
    pub fn new(part_number: u32, num_callbacks: u32, callback: ProgressFn) -> Self {
        PartProgress {
            part_number,
            num_callbacks: num_callbacks.max(1),
            callback,
        }
    }

    pub fn report(&self, bytes_done: u64, bytes_total: u64) {
        (self.callback)(self.part_number, bytes_done, bytes_total);
    }

    /// Split `total` bytes into at most `num_callbacks` slice lengths.
    pub fn slice_lengths(&self, total: usize) -> Vec<usize> {
        if total == 0 {
            return vec![0];
        }
        let slices = (self.num_callbacks as usize).min(total);
        let step = (total + slices - 1) / slices;
        let mut lengths = Vec::with_capacity(slices);
        let mut remaining = total;
        while remaining > 0 {
            let len = step.min(remaining);
            lengths.push(len);
            remaining -= len;
        }
        lengths
    }
}

impl fmt::Debug for PartProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartProgress")
            .field("part_number", &self.part_number)
            .field("num_callbacks", &self.num_callbacks)
            .finish()
    }
}

/// Result of a committed upload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadSummary {
    pub key: String,
    pub upload_id: String,
    pub parts: u32,
    pub bytes: u64,
    pub threads: usize,
    pub elapsed_ms: u64,
    pub completed_at: String,
}
