use super::{IngestStore, OccurrenceStats, StoreError, StoreResult};
use crate::issues::{Issue, Occurrence};
use crate::parser::ParsedLogEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    entries: Vec<(Uuid, ParsedLogEntry)>,
    entry_keys: HashMap<(String, String), Uuid>,
    issues: HashMap<Uuid, Issue>,
    fingerprints: HashMap<(String, String), Uuid>,
    occurrences: Vec<Occurrence>,
    occurrence_keys: HashSet<(Uuid, Uuid)>,
}

/// In-process store with the same uniqueness rules as a database-backed one.
///
/// Every operation takes one lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self) -> usize {
        self.tables.lock().entries.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.tables.lock().occurrences.len()
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn insert_entry(&self, entry: &ParsedLogEntry) -> StoreResult<Uuid> {
        let mut tables = self.tables.lock();
        let key = (entry.server_id.clone(), entry.dedup_key.clone());
        if tables.entry_keys.contains_key(&key) {
            return Err(StoreError::Duplicate(entry.dedup_key.clone()));
        }
        let id = Uuid::new_v4();
        tables.entry_keys.insert(key, id);
        tables.entries.push((id, entry.clone()));
        Ok(id)
    }

    async fn find_entry(&self, server_id: &str, dedup_key: &str) -> StoreResult<Option<Uuid>> {
        Ok(self
            .tables
            .lock()
            .entry_keys
            .get(&(server_id.to_string(), dedup_key.to_string()))
            .copied())
    }

    async fn list_entries(&self, server_id: &str) -> StoreResult<Vec<ParsedLogEntry>> {
        Ok(self
            .tables
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| e.server_id == server_id)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn find_issue(&self, server_id: &str, fingerprint: &str) -> StoreResult<Option<Issue>> {
        let tables = self.tables.lock();
        Ok(tables
            .fingerprints
            .get(&(server_id.to_string(), fingerprint.to_string()))
            .and_then(|id| tables.issues.get(id))
            .cloned())
    }

    async fn get_issue(&self, id: Uuid) -> StoreResult<Issue> {
        self.tables
            .lock()
            .issues
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("issue {}", id)))
    }

    async fn insert_issue(&self, issue: &Issue) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let key = (issue.server_id.clone(), issue.fingerprint.clone());
        if tables.fingerprints.contains_key(&key) {
            return Err(StoreError::ConstraintViolation(format!(
                "fingerprint {} exists for {}",
                issue.fingerprint, issue.server_id
            )));
        }
        tables.fingerprints.insert(key, issue.id);
        tables.issues.insert(issue.id, issue.clone());
        Ok(())
    }

    async fn update_issue(&self, issue: &Issue, expected_version: u64) -> StoreResult<Issue> {
        let mut tables = self.tables.lock();
        let stored = tables
            .issues
            .get_mut(&issue.id)
            .ok_or_else(|| StoreError::NotFound(format!("issue {}", issue.id)))?;
        if stored.version != expected_version {
            return Err(StoreError::ConstraintViolation(format!(
                "issue {} is at version {}, expected {}",
                issue.id, stored.version, expected_version
            )));
        }
        let mut updated = issue.clone();
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_issues(&self, server_id: Option<&str>) -> StoreResult<Vec<Issue>> {
        let tables = self.tables.lock();
        let mut issues: Vec<Issue> = tables
            .issues
            .values()
            .filter(|i| server_id.map_or(true, |s| i.server_id == s))
            .cloned()
            .collect();
        issues.sort_by(|a, b| {
            b.impact_score
                .partial_cmp(&a.impact_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_seen.cmp(&a.last_seen))
        });
        Ok(issues)
    }

    async fn insert_occurrence(&self, occurrence: &Occurrence) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        if !tables
            .occurrence_keys
            .insert((occurrence.issue_id, occurrence.entry_id))
        {
            return Err(StoreError::Duplicate(format!(
                "occurrence of entry {} on issue {}",
                occurrence.entry_id, occurrence.issue_id
            )));
        }
        tables.occurrences.push(occurrence.clone());
        Ok(())
    }

    async fn occurrence_stats(&self, issue_id: Uuid) -> StoreResult<OccurrenceStats> {
        let tables = self.tables.lock();
        let mut stats = OccurrenceStats::default();
        let mut users = HashSet::new();
        let mut sessions = HashSet::new();

        for occurrence in tables.occurrences.iter().filter(|o| o.issue_id == issue_id) {
            stats.count += 1;
            if let Some(user) = &occurrence.user {
                users.insert(user.as_str());
            }
            if let Some(session) = &occurrence.session {
                sessions.insert(session.as_str());
            }
            stats.first_seen = Some(match stats.first_seen {
                Some(first) => first.min(occurrence.timestamp),
                None => occurrence.timestamp,
            });
            stats.last_seen = Some(match stats.last_seen {
                Some(last) => last.max(occurrence.timestamp),
                None => occurrence.timestamp,
            });
        }

        stats.distinct_users = users.len() as u64;
        stats.distinct_sessions = sessions.len() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::{IssueCategory, IssueStatus, Severity};
    use crate::parser::LogLevel;
    use chrono::{Duration, Utc};

    fn entry(key: &str) -> ParsedLogEntry {
        let mut e = ParsedLogEntry::new("sonarr", Utc::now(), LogLevel::Error, "Db", "boom");
        e.dedup_key = key.to_string();
        e
    }

    fn issue(fingerprint: &str) -> Issue {
        let now = Utc::now();
        Issue {
            id: Uuid::new_v4(),
            server_id: "sonarr".to_string(),
            fingerprint: fingerprint.to_string(),
            error_pattern: "boom".to_string(),
            exception_type: None,
            title: "Db: Boom".to_string(),
            sample_message: "boom".to_string(),
            source: "Db".to_string(),
            severity: Severity::Medium,
            category: IssueCategory::General,
            status: IssueStatus::Open,
            first_seen: now,
            last_seen: now,
            occurrence_count: 0,
            affected_users: 0,
            affected_sessions: 0,
            impact_score: 0.0,
            resolved_by: None,
            resolved_at: None,
            version: 0,
        }
    }

    fn occurrence(issue_id: Uuid, user: Option<&str>, minutes_ago: i64) -> Occurrence {
        Occurrence {
            issue_id,
            entry_id: Uuid::new_v4(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            user: user.map(str::to_string),
            session: None,
        }
    }

    #[tokio::test]
    async fn test_entry_unique_per_server_and_key() {
        let store = MemoryStore::new();
        store.insert_entry(&entry("k1")).await.unwrap();
        assert!(matches!(store.insert_entry(&entry("k1")).await, Err(StoreError::Duplicate(_))));

        let mut other_server = entry("k1");
        other_server.server_id = "radarr".to_string();
        store.insert_entry(&other_server).await.unwrap();
        assert_eq!(store.entry_count(), 2);
        assert_eq!(store.list_entries("sonarr").await.unwrap().len(), 1);

        let id = store.find_entry("sonarr", "k1").await.unwrap();
        assert!(id.is_some());
        assert_ne!(id, store.find_entry("radarr", "k1").await.unwrap());
        assert!(store.find_entry("sonarr", "k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_issue_fingerprint_unique() {
        let store = MemoryStore::new();
        store.insert_issue(&issue("fp")).await.unwrap();
        assert!(matches!(
            store.insert_issue(&issue("fp")).await,
            Err(StoreError::ConstraintViolation(_))
        ));
        assert!(store.find_issue("sonarr", "fp").await.unwrap().is_some());
        assert!(store.find_issue("radarr", "fp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let store = MemoryStore::new();
        let mut i = issue("fp");
        store.insert_issue(&i).await.unwrap();

        i.occurrence_count = 5;
        let updated = store.update_issue(&i, 0).await.unwrap();
        assert_eq!(updated.version, 1);

        // Stale writer
        assert!(matches!(
            store.update_issue(&i, 0).await,
            Err(StoreError::ConstraintViolation(_))
        ));
        assert_eq!(store.get_issue(i.id).await.unwrap().occurrence_count, 5);
    }

    #[tokio::test]
    async fn test_occurrence_stats() {
        let store = MemoryStore::new();
        let i = issue("fp");
        store.insert_issue(&i).await.unwrap();

        let first = occurrence(i.id, Some("alice"), 10);
        store.insert_occurrence(&first).await.unwrap();
        store.insert_occurrence(&occurrence(i.id, Some("alice"), 5)).await.unwrap();
        store.insert_occurrence(&occurrence(i.id, Some("bob"), 1)).await.unwrap();
        store.insert_occurrence(&occurrence(i.id, None, 0)).await.unwrap();
        assert!(matches!(store.insert_occurrence(&first).await, Err(StoreError::Duplicate(_))));

        let stats = store.occurrence_stats(i.id).await.unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.distinct_users, 2);
        assert_eq!(stats.distinct_sessions, 0);
        assert_eq!(stats.first_seen, Some(first.timestamp));
        assert_eq!(store.occurrence_count(), 4);
    }
}
