//! Keeping secrets out of logs and terminal output.
//!
//! Upload failures carry backend error text, URLs and sometimes the
//! arguments they were started with. Everything the binary prints about a
//! failure goes through [`credential_scrubber`] first.

pub mod credential_scrubber;

pub use credential_scrubber::{safe_error_message, scrub_credentials, scrub_secret};
