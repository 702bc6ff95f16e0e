//! Utility modules.

pub mod file;
pub mod retry;
pub mod text;

pub use file::{read_dump_file, write_atomically};
pub use retry::{Backoff, RetryConfig, RetryResult, Retryable, with_retry};
pub use text::{chunk_to_record, extract_namespaces, extract_type_names};
