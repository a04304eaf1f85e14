//! Chunked, parallel multipart uploads.
//!
//! An upload reads its source strictly in order, cuts it into parts of a
//! fixed size and hands each part to a worker. At most `threads` parts are
//! in flight. Every part is retried on its own; the first part that runs out
//! of attempts stops new submissions, cancels its siblings and aborts the
//! transaction. The object only becomes visible once every part succeeded
//! and the commit went through.
//!
//! ```text
//!  source ──▶ Chunker ──▶ UploadCoordinator ──▶ PartUploader (xN) ──▶ backend
//!                              │    ▲                 │
//!                  AdmissionControl │                 │ failure
//!                                   └─ ErrorAggregator ◀┘
//! ```
//!
//! The [`upload`] function wires these together inside a [`Transaction`],
//! which guarantees the multipart upload ends either completed or aborted.

/// Bounded in-flight part admission
pub mod admission;

/// First-failure error collection
pub mod aggregator;

/// Splitting a sequential source into numbered parts
pub mod chunker;

/// Submission loop and worker fan-out
pub mod coordinator;

/// Per-call upload tunables
pub mod options;

/// Per-part upload with retries
pub mod part;

/// Multipart transaction lifecycle and the `upload` entry point
pub mod transaction;

pub use chunker::UploadSource;
pub use options::UploadOptions;
pub use part::RetryPolicy;
pub use transaction::{upload, Transaction};
