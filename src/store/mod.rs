pub mod memory;

pub use memory::MemoryStore;

use crate::issues::{Issue, Occurrence};
use crate::parser::ParsedLogEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by an ingest store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A row with the same unique key exists; the write was not applied
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// A concurrent writer got there first
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Aggregates over the occurrences linked to one issue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceStats {
    pub count: u64,
    pub distinct_users: u64,
    pub distinct_sessions: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Persistence for entries, issues and occurrences.
///
/// Implementations enforce uniqueness of (server, dedup key) for entries,
/// (server, fingerprint) for issues and (issue, entry) for occurrences, and
/// reject issue updates whose expected version is stale.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Store an entry, returning its id. `Duplicate` if the key exists.
    async fn insert_entry(&self, entry: &ParsedLogEntry) -> StoreResult<Uuid>;

    /// Id of the entry stored under (server, dedup key), if any
    async fn find_entry(&self, server_id: &str, dedup_key: &str) -> StoreResult<Option<Uuid>>;

    async fn list_entries(&self, server_id: &str) -> StoreResult<Vec<ParsedLogEntry>>;

    async fn find_issue(&self, server_id: &str, fingerprint: &str) -> StoreResult<Option<Issue>>;

    async fn get_issue(&self, id: Uuid) -> StoreResult<Issue>;

    /// `ConstraintViolation` if the fingerprint is already taken
    async fn insert_issue(&self, issue: &Issue) -> StoreResult<()>;

    /// Replace an issue if its stored version equals `expected_version`.
    /// Returns the stored issue with its new version.
    async fn update_issue(&self, issue: &Issue, expected_version: u64) -> StoreResult<Issue>;

    async fn list_issues(&self, server_id: Option<&str>) -> StoreResult<Vec<Issue>>;

    /// `Duplicate` if this (issue, entry) pair is already linked
    async fn insert_occurrence(&self, occurrence: &Occurrence) -> StoreResult<()>;

    async fn occurrence_stats(&self, issue_id: Uuid) -> StoreResult<OccurrenceStats>;
}
