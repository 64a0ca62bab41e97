use super::events::{IssueEvent, IssuePublisher};
use super::fingerprint::{fingerprint, normalize_error_pattern};
use super::model::{Issue, IssueStatus, Occurrence};
use super::rules::{classify, generate_title, impact_score};
use crate::config::RecurrencePolicy;
use crate::error::{backoff_delay, IngestError, IngestResult};
use crate::parser::ParsedLogEntry;
use crate::store::{IngestStore, StoreError, StoreResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(10);

/// Groups error entries into issues by fingerprint.
///
/// All writes go through the store's uniqueness and version checks; a
/// conflicting concurrent writer causes a re-read and retry, never a lost
/// update.
pub struct IssueCorrelator {
    store: Arc<dyn IngestStore>,
    publisher: Arc<dyn IssuePublisher>,
    recurrence: RecurrencePolicy,
    max_retries: u32,
    retry_base: Duration,
}

impl IssueCorrelator {
    pub fn new(store: Arc<dyn IngestStore>, publisher: Arc<dyn IssuePublisher>) -> Self {
        Self {
            store,
            publisher,
            recurrence: RecurrencePolicy::default(),
            max_retries: 5,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    pub fn with_recurrence_policy(mut self, policy: RecurrencePolicy) -> Self {
        self.recurrence = policy;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = base;
        self
    }

    /// Link a stored error entry to its issue, creating the issue on first
    /// sight. Returns `None` for entries below error level and for entries
    /// whose occurrence is already linked and counted.
    pub async fn correlate(
        &self,
        entry: &ParsedLogEntry,
        entry_id: Uuid,
    ) -> IngestResult<Option<IssueEvent>> {
        if !entry.is_error() {
            return Ok(None);
        }

        let exception_type = entry.exception_type.as_deref();
        let pattern = normalize_error_pattern(&entry.message, exception_type);
        let fp = fingerprint(&entry.source, &pattern, exception_type);

        let mut attempt = 0u32;
        let mut created = false;
        loop {
            attempt += 1;
            match self.upsert(entry, entry_id, &pattern, &fp, &mut created).await {
                Ok(Some(event)) => {
                    self.publisher.publish(event.clone()).await;
                    return Ok(Some(event));
                }
                Ok(None) => {
                    debug!(fingerprint = %fp, entry = %entry_id, "Occurrence already counted");
                    return Ok(None);
                }
                Err(StoreError::ConstraintViolation(reason)) if attempt <= self.max_retries => {
                    let delay = backoff_delay(self.retry_base, self.retry_base * 64, attempt);
                    debug!(
                        fingerprint = %fp,
                        attempt,
                        "Issue upsert conflicted, retrying in {:?}: {}",
                        delay,
                        reason
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::ConstraintViolation(reason)) => {
                    return Err(IngestError::ConstraintViolation(reason));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn upsert(
        &self,
        entry: &ParsedLogEntry,
        entry_id: Uuid,
        pattern: &str,
        fp: &str,
        created: &mut bool,
    ) -> StoreResult<Option<IssueEvent>> {
        let mut issue = match self.store.find_issue(&entry.server_id, fp).await? {
            Some(issue) => issue,
            None => {
                let issue = new_issue(entry, pattern, fp);
                self.store.insert_issue(&issue).await?;
                info!(
                    server = %entry.server_id,
                    severity = issue.severity.as_str(),
                    "New issue: {}",
                    issue.title
                );
                *created = true;
                issue
            }
        };

        let occurrence = Occurrence {
            issue_id: issue.id,
            entry_id,
            timestamp: entry.timestamp,
            user: entry.user.clone(),
            session: entry.session.clone(),
        };
        let already_linked = match self.store.insert_occurrence(&occurrence).await {
            Ok(()) => false,
            // Linked by an earlier attempt or an earlier read of the same bytes
            Err(StoreError::Duplicate(_)) => true,
            Err(e) => return Err(e),
        };

        let stats = self.store.occurrence_stats(issue.id).await?;
        if already_linked && !*created && issue.occurrence_count == stats.count {
            return Ok(None);
        }

        let expected_version = issue.version;
        if !issue.status.is_active() && self.recurrence == RecurrencePolicy::Reopen {
            info!(issue = %issue.id, from = %issue.status, "Reopening issue on recurrence");
            issue.reopen_on_recurrence();
        }

        issue.occurrence_count = stats.count;
        issue.affected_users = stats.distinct_users;
        issue.affected_sessions = stats.distinct_sessions;
        if let Some(first) = stats.first_seen {
            issue.first_seen = issue.first_seen.min(first);
        }
        if let Some(last) = stats.last_seen {
            issue.last_seen = issue.last_seen.max(last);
        }
        issue.impact_score = impact_score(
            issue.occurrence_count,
            issue.severity,
            issue.affected_users,
            issue.last_seen,
            Utc::now(),
        );

        let updated = self.store.update_issue(&issue, expected_version).await?;
        Ok(Some(if *created {
            IssueEvent::Created(updated)
        } else {
            IssueEvent::Updated(updated)
        }))
    }
}

fn new_issue(entry: &ParsedLogEntry, pattern: &str, fp: &str) -> Issue {
    let exception_type = entry.exception_type.as_deref();
    let classification = classify(&entry.message, exception_type, entry.level);

    Issue {
        id: Uuid::new_v4(),
        server_id: entry.server_id.clone(),
        fingerprint: fp.to_string(),
        error_pattern: pattern.to_string(),
        exception_type: entry.exception_type.clone(),
        title: generate_title(&entry.source, pattern, exception_type),
        sample_message: entry.message.clone(),
        source: entry.source.clone(),
        severity: classification.severity,
        category: classification.category,
        status: IssueStatus::Open,
        first_seen: entry.timestamp,
        last_seen: entry.timestamp,
        occurrence_count: 0,
        affected_users: 0,
        affected_sessions: 0,
        impact_score: 0.0,
        resolved_by: None,
        resolved_at: None,
        version: 0,
    }
}
