//! Object storage backends for multipart uploads.
//!
//! The upload engine only talks to a [`MultipartBackend`](backend::MultipartBackend).
//! Two implementations ship with the crate:
//!
//! - **Amazon S3** (and S3-compatible endpoints) through rusoto
//! - **In-memory** store used by tests, benchmarks and dry runs
//!
//! ## Usage Example
//!
//! ```no_run
//! use rust_s3upload::cloud::client::{create_s3_client, S3ClientConfig};
//! use rust_s3upload::cloud::s3::S3Backend;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = S3ClientConfig {
//!     region: Some("us-east-1".to_string()),
//!     ..Default::default()
//! };
//!
//! let client = create_s3_client(&config)?;
//! let backend = S3Backend::new(client, "backup-bucket");
//! # Ok(())
//! # }
//! ```

/// Storage operations the upload engine needs
pub mod backend;

/// S3 client construction and credentials
pub mod client;

/// In-memory multipart store
pub mod memory;

/// Amazon S3 backend
pub mod s3;
