//! # s3upload
//!
//! Chunked, parallel multipart uploads to S3 and S3-compatible object
//! storage, written in Rust.
//!
//! ## Overview
//!
//! s3upload takes a sequential byte source (a reader such as a file or
//! stdin, or an iterator of byte fragments), splits it into fixed-size parts
//! and uploads the parts concurrently as one multipart upload. The object
//! appears in the bucket only when every part made it; otherwise the
//! multipart upload is aborted and no partial object is left behind.
//!
//! ## Features
//!
//! - **Bounded parallelism**: at most `threads` parts in flight, with
//!   backpressure on the source
//! - **Per-part retries**: each part is retried on its own, optionally with
//!   exponential backoff
//! - **Fail fast**: the first part that exhausts its retries cancels the rest
//!   and aborts the transaction
//! - **Progress reporting**: per-part `(part, uploaded, total)` callbacks
//! - **Pluggable backends**: S3 through rusoto, plus an in-memory store
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_s3upload::cloud::client::{create_s3_client, S3ClientConfig};
//! use rust_s3upload::cloud::s3::S3Backend;
//! use rust_s3upload::upload::{upload, UploadOptions, UploadSource};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = create_s3_client(&S3ClientConfig::default())?;
//! let backend = Arc::new(S3Backend::new(client, "backup-bucket"));
//!
//! let file = tokio::fs::File::open("/var/backups/db.tar").await?;
//! let options = UploadOptions::default().with_threads(8);
//!
//! let summary = upload(backend, UploadSource::reader(file), "db.tar", options).await?;
//! println!("Uploaded {} parts", summary.parts);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`upload`]: The upload engine (chunking, admission, retries, transaction)
//! - [`cloud`]: Storage backends (S3, in-memory)
//! - [`models`]: Parts, handles, progress and summaries
//! - [`error`]: Error types
//! - [`config`]: YAML configuration and environment overrides
//! - [`security`]: Credential scrubbing for log output
//! - [`cli`]: Command-line interface definitions
//! - [`constants`]: Limits and defaults

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models shared by the engine and the backends
pub mod models;

/// Object storage backends
pub mod cloud;

/// Configuration file and environment handling
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Error types for uploads and backends
pub mod error;

/// Credential protection for logs and error output
pub mod security;

/// The multipart upload engine
pub mod upload;

pub use error::UploadFailure;
pub use upload::{upload, UploadOptions, UploadSource};
