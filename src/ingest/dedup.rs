use crate::error::{IngestError, IngestResult};
use crate::parser::ParsedLogEntry;
use crate::store::{IngestStore, StoreError};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Result of offering an entry for storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Stored(Uuid),
    /// Already stored under this id
    Duplicate(Uuid),
}

/// Idempotency key for an entry.
///
/// An activity id supplied by an API source wins. File entries hash the
/// server, the normalized message, the minute the entry was logged in and
/// its file position, so re-reading the same bytes yields the same key.
pub fn dedup_key(entry: &ParsedLogEntry) -> String {
    if let Some(activity) = entry.activity_id.as_deref().filter(|a| !a.trim().is_empty()) {
        return format!("activity:{}", activity.trim());
    }

    let message = entry
        .message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let bucket = entry.timestamp.format("%Y-%m-%dT%H:%M");
    let origin = match (&entry.file_path, entry.line_number) {
        (Some(path), Some(line)) => format!("{}:{}", path, line),
        (Some(path), None) => path.clone(),
        _ => String::new(),
    };

    let input = format!("{}|{}|{}|{}", entry.server_id, message, bucket, origin);
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Stores each entry at most once per (server, key)
pub struct Deduplicator {
    store: Arc<dyn IngestStore>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    /// Assign the entry's key if missing and store it. Duplicates are
    /// dropped quietly and resolve to the id of the stored copy.
    pub async fn ingest(&self, entry: &mut ParsedLogEntry) -> IngestResult<DedupOutcome> {
        if entry.dedup_key.is_empty() {
            entry.dedup_key = dedup_key(entry);
        }

        match self.store.insert_entry(entry).await {
            Ok(id) => Ok(DedupOutcome::Stored(id)),
            Err(StoreError::Duplicate(_)) => {
                let duplicate = IngestError::DuplicateEntry {
                    server_id: entry.server_id.clone(),
                    dedup_key: entry.dedup_key.clone(),
                };
                debug!("Discarding: {}", duplicate);
                let existing = self
                    .store
                    .find_entry(&entry.server_id, &entry.dedup_key)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(duplicate.to_string()))?;
                Ok(DedupOutcome::Duplicate(existing))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LogLevel;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn entry(message: &str, second: u32) -> ParsedLogEntry {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, second).unwrap();
        ParsedLogEntry::new("sonarr", ts, LogLevel::Error, "Db", message)
            .with_origin("/logs/sonarr.txt", 42)
    }

    #[test]
    fn test_key_stable_within_minute_and_whitespace() {
        assert_eq!(dedup_key(&entry("Database  is Locked", 1)), dedup_key(&entry("database is locked", 59)));
    }

    #[test]
    fn test_key_varies_with_origin_and_server() {
        let base = dedup_key(&entry("boom", 0));
        assert_ne!(base, dedup_key(&entry("boom", 0).with_origin("/logs/sonarr.txt", 43)));

        let mut other = entry("boom", 0);
        other.server_id = "radarr".to_string();
        assert_ne!(base, dedup_key(&other));
    }

    #[test]
    fn test_activity_id_preferred() {
        let a = entry("boom", 0).with_activity_id("evt-1");
        let b = entry("different", 30).with_activity_id("evt-1");
        assert_eq!(dedup_key(&a), "activity:evt-1");
        assert_eq!(dedup_key(&a), dedup_key(&b));
    }

    #[tokio::test]
    async fn test_duplicate_discarded_in_any_order() {
        let store = Arc::new(MemoryStore::new());
        let dedup = Deduplicator::new(store.clone());

        let mut first = entry("database is locked", 5);
        let DedupOutcome::Stored(stored) = dedup.ingest(&mut first).await.unwrap() else {
            panic!("first copy not stored");
        };

        for second in [59, 0, 5] {
            let mut replay = entry("database is locked", second);
            assert_eq!(dedup.ingest(&mut replay).await.unwrap(), DedupOutcome::Duplicate(stored));
            assert_eq!(replay.dedup_key, first.dedup_key);
        }
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_key_kept() {
        let store = Arc::new(MemoryStore::new());
        let dedup = Deduplicator::new(store);
        let mut e = entry("boom", 0);
        e.dedup_key = "preset".to_string();
        dedup.ingest(&mut e).await.unwrap();
        assert_eq!(e.dedup_key, "preset");
    }
}
