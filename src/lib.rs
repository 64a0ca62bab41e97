//! Log ingestion for self-hosted media servers and *arr applications.
//!
//! Files are discovered per configured server, tailed incrementally with
//! persisted checkpoints, parsed into multi-line entries, deduplicated and
//! correlated into issues keyed by a normalized error fingerprint.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod issues;
pub mod parser;
pub mod store;
pub mod tailer;

pub use error::{IngestError, IngestResult};
