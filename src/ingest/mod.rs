pub mod dedup;

pub use dedup::{dedup_key, DedupOutcome, Deduplicator};

use crate::config::IngestSettings;
use crate::error::{IngestError, IngestResult};
use crate::issues::{IssueCorrelator, IssueEvent, IssuePublisher};
use crate::parser::{boost_severity, ParsedLogEntry};
use crate::store::IngestStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened to one entry
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored {
        entry_id: Uuid,
        event: Option<IssueEvent>,
    },
    Duplicate,
    /// Stored, but issue correlation failed and will be retried once
    Requeued { entry_id: Uuid },
}

/// Per-server counters and last failure
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerHealth {
    pub entries: u64,
    pub duplicates: u64,
    pub errors_correlated: u64,
    pub last_entry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Severity boost, deduplication and issue correlation for parsed entries.
///
/// A failure on one entry is recorded against its server and never stops
/// the pipeline.
pub struct IngestPipeline {
    dedup: Deduplicator,
    correlator: IssueCorrelator,
    requeue: Mutex<VecDeque<(ParsedLogEntry, Uuid)>>,
    health: Mutex<HashMap<String, ServerHealth>>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn IngestStore>,
        publisher: Arc<dyn IssuePublisher>,
        settings: &IngestSettings,
    ) -> Self {
        let correlator = IssueCorrelator::new(Arc::clone(&store), publisher)
            .with_recurrence_policy(settings.recurrence_policy)
            .with_retries(settings.upsert_retries, Duration::from_millis(10));
        Self::with_correlator(Deduplicator::new(store), correlator)
    }

    pub fn with_correlator(dedup: Deduplicator, correlator: IssueCorrelator) -> Self {
        Self {
            dedup,
            correlator,
            requeue: Mutex::new(VecDeque::new()),
            health: Mutex::new(HashMap::new()),
        }
    }

    /// Process one entry end to end
    pub async fn process(&self, mut entry: ParsedLogEntry) -> IngestResult<IngestOutcome> {
        boost_severity(&mut entry);

        let entry_id = match self.dedup.ingest(&mut entry).await? {
            DedupOutcome::Stored(id) => id,
            DedupOutcome::Duplicate(existing) => {
                self.update_health(&entry.server_id, |h| h.duplicates += 1);
                // The first read may have been stored without finishing correlation
                if entry.is_error() {
                    if let Err(e) = self.correlator.correlate(&entry, existing).await {
                        return Ok(self.requeue(entry, existing, e));
                    }
                }
                return Ok(IngestOutcome::Duplicate);
            }
        };
        let timestamp = entry.timestamp;
        self.update_health(&entry.server_id, |h| {
            h.entries += 1;
            h.last_entry_at = Some(h.last_entry_at.map_or(timestamp, |t| t.max(timestamp)));
        });

        match self.correlator.correlate(&entry, entry_id).await {
            Ok(event) => {
                if event.is_some() {
                    self.update_health(&entry.server_id, |h| h.errors_correlated += 1);
                }
                Ok(IngestOutcome::Stored { entry_id, event })
            }
            Err(e) => Ok(self.requeue(entry, entry_id, e)),
        }
    }

    fn requeue(&self, entry: ParsedLogEntry, entry_id: Uuid, error: IngestError) -> IngestOutcome {
        warn!(
            server = %entry.server_id,
            dedup_key = %entry.dedup_key,
            "Issue correlation failed, requeueing once: {}",
            error
        );
        self.requeue.lock().push_back((entry, entry_id));
        IngestOutcome::Requeued { entry_id }
    }

    /// Give every requeued entry its second and last correlation attempt
    pub async fn retry_requeued(&self) -> usize {
        let pending: Vec<_> = self.requeue.lock().drain(..).collect();
        let count = pending.len();

        for (entry, entry_id) in pending {
            match self.correlator.correlate(&entry, entry_id).await {
                Ok(Some(_)) => {
                    self.update_health(&entry.server_id, |h| h.errors_correlated += 1);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        server = %entry.server_id,
                        dedup_key = %entry.dedup_key,
                        "Giving up on issue correlation: {}",
                        e
                    );
                    self.record_error(&entry.server_id, &e);
                }
            }
        }
        count
    }

    pub fn pending_requeue(&self) -> usize {
        self.requeue.lock().len()
    }

    /// Consume entries until every sender is dropped. Returns how many were processed.
    pub async fn run(&self, mut entries: mpsc::Receiver<ParsedLogEntry>) -> u64 {
        let mut processed = 0u64;
        while let Some(entry) = entries.recv().await {
            let server_id = entry.server_id.clone();
            if let Err(e) = self.process(entry).await {
                if e.is_recoverable() {
                    warn!(server = %server_id, "Failed to ingest entry: {}", e);
                } else {
                    error!(server = %server_id, "Failed to ingest entry: {}", e);
                }
                self.record_error(&server_id, &e);
            }
            if self.pending_requeue() > 0 {
                self.retry_requeued().await;
            }
            processed += 1;
        }
        self.retry_requeued().await;
        info!(processed, "Ingest pipeline drained");
        processed
    }

    pub fn record_error(&self, server_id: &str, error: &IngestError) {
        let message = error.to_string();
        self.update_health(server_id, |h| {
            h.last_error = Some(message);
            h.last_error_at = Some(Utc::now());
        });
    }

    pub fn health(&self, server_id: &str) -> Option<ServerHealth> {
        self.health.lock().get(server_id).cloned()
    }

    pub fn server_health(&self) -> HashMap<String, ServerHealth> {
        self.health.lock().clone()
    }

    fn update_health(&self, server_id: &str, update: impl FnOnce(&mut ServerHealth)) {
        let mut health = self.health.lock();
        update(health.entry(server_id.to_string()).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::{Issue, IssueStatus, Occurrence, RecordingPublisher};
    use crate::parser::LogLevel;
    use crate::store::{MemoryStore, OccurrenceStats, StoreError, StoreResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn entry(level: LogLevel, message: &str, line: u64) -> ParsedLogEntry {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        ParsedLogEntry::new("sonarr", ts, level, "Db", message).with_origin("/logs/sonarr.txt", line)
    }

    fn pipeline(store: Arc<dyn IngestStore>) -> (IngestPipeline, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::new());
        let pipeline = IngestPipeline::new(store, publisher.clone(), &IngestSettings::default());
        (pipeline, publisher)
    }

    #[tokio::test]
    async fn test_boosted_warning_becomes_issue() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, publisher) = pipeline(store.clone());

        let outcome = pipeline
            .process(entry(LogLevel::Warn, "Database is locked, retrying", 1))
            .await
            .unwrap();
        match outcome {
            IngestOutcome::Stored { event: Some(IssueEvent::Created(issue)), .. } => {
                assert_eq!(issue.status, IssueStatus::Open);
                assert_eq!(issue.occurrence_count, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(publisher.events().len(), 1);
        assert!(store.list_entries("sonarr").await.unwrap()[0].boosted);
    }

    #[tokio::test]
    async fn test_replay_stored_once() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, publisher) = pipeline(store.clone());

        let first = pipeline.process(entry(LogLevel::Error, "boom", 7)).await.unwrap();
        assert!(matches!(first, IngestOutcome::Stored { .. }));
        let second = pipeline.process(entry(LogLevel::Error, "boom", 7)).await.unwrap();
        assert_eq!(second, IngestOutcome::Duplicate);

        assert_eq!(store.entry_count(), 1);
        let issues = store.list_issues(None).await.unwrap();
        assert_eq!(issues[0].occurrence_count, 1);
        assert_eq!(publisher.events().len(), 1);

        let health = pipeline.health("sonarr").unwrap();
        assert_eq!(health.entries, 1);
        assert_eq!(health.duplicates, 1);
        assert_eq!(health.errors_correlated, 1);
    }

    #[tokio::test]
    async fn test_info_entries_stored_without_issue() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, publisher) = pipeline(store.clone());

        let outcome = pipeline.process(entry(LogLevel::Info, "RSS Sync Completed", 1)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored { event: None, .. }));
        assert!(publisher.events().is_empty());
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _) = pipeline(store.clone());
        let (tx, rx) = mpsc::channel(8);

        for line in 1..=3 {
            tx.send(entry(LogLevel::Error, "Grab failed", line)).await.unwrap();
        }
        tx.send(entry(LogLevel::Error, "Grab failed", 1)).await.unwrap();
        drop(tx);

        assert_eq!(pipeline.run(rx).await, 4);
        assert_eq!(store.entry_count(), 3);
        assert_eq!(store.list_issues(None).await.unwrap()[0].occurrence_count, 3);
    }

    /// Conflicts on every issue update until `healthy` is set, and fails the
    /// first `lookup_failures` issue lookups as unavailable
    struct StuckStore {
        inner: MemoryStore,
        healthy: AtomicBool,
        lookup_failures: AtomicU32,
    }

    impl StuckStore {
        fn conflicting() -> Self {
            Self {
                inner: MemoryStore::new(),
                healthy: AtomicBool::new(false),
                lookup_failures: AtomicU32::new(0),
            }
        }

        fn unavailable_for(lookups: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                healthy: AtomicBool::new(true),
                lookup_failures: AtomicU32::new(lookups),
            }
        }
    }

    #[async_trait]
    impl IngestStore for StuckStore {
        async fn insert_entry(&self, entry: &ParsedLogEntry) -> StoreResult<Uuid> {
            self.inner.insert_entry(entry).await
        }
        async fn find_entry(&self, server_id: &str, key: &str) -> StoreResult<Option<Uuid>> {
            self.inner.find_entry(server_id, key).await
        }
        async fn list_entries(&self, server_id: &str) -> StoreResult<Vec<ParsedLogEntry>> {
            self.inner.list_entries(server_id).await
        }
        async fn find_issue(&self, server_id: &str, fp: &str) -> StoreResult<Option<Issue>> {
            let remaining = self.lookup_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.lookup_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.find_issue(server_id, fp).await
        }
        async fn get_issue(&self, id: Uuid) -> StoreResult<Issue> {
            self.inner.get_issue(id).await
        }
        async fn insert_issue(&self, issue: &Issue) -> StoreResult<()> {
            self.inner.insert_issue(issue).await
        }
        async fn update_issue(&self, issue: &Issue, expected: u64) -> StoreResult<Issue> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(StoreError::ConstraintViolation("contended".to_string()));
            }
            self.inner.update_issue(issue, expected).await
        }
        async fn list_issues(&self, server_id: Option<&str>) -> StoreResult<Vec<Issue>> {
            self.inner.list_issues(server_id).await
        }
        async fn insert_occurrence(&self, occurrence: &Occurrence) -> StoreResult<()> {
            self.inner.insert_occurrence(occurrence).await
        }
        async fn occurrence_stats(&self, issue_id: Uuid) -> StoreResult<OccurrenceStats> {
            self.inner.occurrence_stats(issue_id).await
        }
    }

    fn stuck_pipeline(store: Arc<StuckStore>) -> IngestPipeline {
        let settings = IngestSettings {
            upsert_retries: 1,
            ..Default::default()
        };
        IngestPipeline::new(store, Arc::new(RecordingPublisher::new()), &settings)
    }

    #[tokio::test]
    async fn test_requeued_once_then_succeeds() {
        let store = Arc::new(StuckStore::conflicting());
        let pipeline = stuck_pipeline(store.clone());

        let outcome = pipeline.process(entry(LogLevel::Error, "boom", 1)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Requeued { .. }));
        assert_eq!(pipeline.pending_requeue(), 1);

        store.healthy.store(true, Ordering::SeqCst);
        assert_eq!(pipeline.retry_requeued().await, 1);
        assert_eq!(pipeline.pending_requeue(), 0);
        assert_eq!(store.inner.list_issues(None).await.unwrap()[0].occurrence_count, 1);
        assert!(pipeline.health("sonarr").unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_requeue_gives_up_after_second_failure() {
        let store = Arc::new(StuckStore::conflicting());
        let pipeline = stuck_pipeline(store);

        pipeline.process(entry(LogLevel::Error, "boom", 1)).await.unwrap();
        assert_eq!(pipeline.retry_requeued().await, 1);
        // Not requeued a second time
        assert_eq!(pipeline.pending_requeue(), 0);
        assert_eq!(pipeline.retry_requeued().await, 0);

        let health = pipeline.health("sonarr").unwrap();
        assert!(health.last_error.unwrap().contains("contended"));
        assert!(health.last_error_at.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store_requeues_stored_entry() {
        let store = Arc::new(StuckStore::unavailable_for(1));
        let pipeline = stuck_pipeline(store.clone());

        let outcome = pipeline.process(entry(LogLevel::Error, "boom", 1)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Requeued { .. }));
        assert_eq!(store.inner.entry_count(), 1);
        assert!(store.inner.list_issues(None).await.unwrap().is_empty());

        assert_eq!(pipeline.retry_requeued().await, 1);
        let issues = store.inner.list_issues(None).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].occurrence_count, 1);
    }

    #[tokio::test]
    async fn test_replay_correlates_entry_left_without_issue() {
        // Fails the first attempt and the requeued one
        let store = Arc::new(StuckStore::unavailable_for(2));
        let pipeline = stuck_pipeline(store.clone());

        pipeline.process(entry(LogLevel::Error, "boom", 1)).await.unwrap();
        pipeline.retry_requeued().await;
        assert!(store.inner.list_issues(None).await.unwrap().is_empty());

        // Same bytes read again after a restart
        let outcome = pipeline.process(entry(LogLevel::Error, "boom", 1)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Duplicate);
        assert_eq!(store.inner.entry_count(), 1);

        let issues = store.inner.list_issues(None).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].occurrence_count, 1);
        assert_eq!(store.inner.occurrence_count(), 1);
    }
}
