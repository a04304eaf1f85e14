//! Global constants for the s3upload engine.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Part sizing constants
/// S3 minimum part size for multipart uploads (5MB). Every part except the
/// last one must be at least this large.
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 maximum size of a single part (5GB)
pub const S3_MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default chunk size used to split the source (5MB)
pub const DEFAULT_CHUNK_SIZE: usize = S3_MIN_PART_SIZE;

/// S3 maximum parts per upload
pub const S3_MAX_PARTS: u32 = 10_000;

// Concurrency constants
/// Default number of parts uploaded concurrently
pub const DEFAULT_THREADS: usize = 5;

// Timeout and retry constants
/// Attempts per part (1 initial + 4 retries)
pub const MAX_PART_ATTEMPTS: u32 = 5;

/// Base retry delay in milliseconds (0 retries immediately)
pub const RETRY_BASE_DELAY_MS: u64 = 0;

/// Maximum retry delay in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

// Progress constants
/// How many progress callbacks a backend should aim for per part
pub const PROGRESS_CALLBACKS_PER_PART: u32 = 100;

// Environment variable names
/// Overrides the configured thread count
pub const ENV_THREADS: &str = "S3UPLOAD_THREADS";

/// Overrides the configured chunk size (in MB)
pub const ENV_CHUNK_SIZE_MB: &str = "S3UPLOAD_CHUNK_SIZE_MB";

/// Overrides the configured attempts per part
pub const ENV_MAX_ATTEMPTS: &str = "S3UPLOAD_MAX_ATTEMPTS";

/// Overrides the configured AWS region
pub const ENV_REGION: &str = "S3UPLOAD_REGION";

/// Overrides the configured S3 endpoint
pub const ENV_ENDPOINT: &str = "S3UPLOAD_ENDPOINT";
