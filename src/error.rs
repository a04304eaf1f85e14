//! Error types for the upload engine.
//!
//! Transient per-part failures never leave the part uploader; everything in
//! here is either a precondition failure (raised before a transaction exists)
//! or a fatal condition that ends the transaction.

use std::io;

use thiserror::Error;

/// Errors reported by a multipart backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced a server response (connection, TLS,
    /// credentials, local I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with an error.
    #[error("server error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Server {
        status: Option<u16>,
        message: String,
    },
}

impl BackendError {
    pub fn transport(message: impl Into<String>) -> Self {
        BackendError::Transport(message.into())
    }

    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        BackendError::Server {
            status,
            message: message.into(),
        }
    }
}

/// Conditions checked before any multipart call is made.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("key {0} already exists")]
    KeyExists(String),

    #[error("source is empty, nothing to upload")]
    EmptySource,

    #[error("invalid upload options: {0}")]
    InvalidOptions(String),
}

/// Failures while turning the source into parts.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read source: {0}")]
    Read(#[from] io::Error),

    #[error("source needs more than {limit} parts, increase the chunk size")]
    TooManyParts { limit: u32 },
}

/// A single part exhausted its retry budget.
#[derive(Debug, Error)]
#[error("part {part_number} failed after {attempts} attempts on {worker}: {source}")]
pub struct PartUploadError {
    pub part_number: u32,
    /// Identity of the worker thread that ran the last attempt
    pub worker: String,
    pub attempts: u32,
    #[source]
    pub source: BackendError,
}

/// `abort()` itself failed while cleaning up. Logged, never returned in
/// place of the failure that triggered the abort.
#[derive(Debug, Error)]
#[error("failed to abort multipart upload {upload_id}: {source}")]
pub struct TransactionAbortError {
    pub upload_id: String,
    #[source]
    pub source: BackendError,
}

/// Terminal failure of an `upload()` call.
#[derive(Debug, Error)]
pub enum UploadFailure {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("failed to check whether {key} exists: {source}")]
    Lookup {
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to initiate multipart upload for {key}: {source}")]
    Initiate {
        key: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    PartUpload(#[from] PartUploadError),

    #[error("failed to complete multipart upload {upload_id}: {source}")]
    Commit {
        upload_id: String,
        #[source]
        source: BackendError,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload worker failed: {0}")]
    Worker(String),
}
