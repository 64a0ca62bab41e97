use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Severity of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "critical")]
    Critical,
}

impl Severity {
    /// Contribution to the impact score, out of 30
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 30.0,
            Severity::High => 22.0,
            Severity::Medium => 14.0,
            Severity::Low => 7.0,
            Severity::Info => 2.0,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Severity::Critical => "red",
            Severity::High => "bright red",
            Severity::Medium => "yellow",
            Severity::Low => "bright yellow",
            Severity::Info => "blue",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// Broad area an issue belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    #[serde(rename = "database")]
    Database,
    #[serde(rename = "storage")]
    Storage,
    #[serde(rename = "permission")]
    Permission,
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "import")]
    Import,
    #[serde(rename = "general")]
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "acknowledged")]
    Acknowledged,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "ignored")]
    Ignored,
}

impl IssueStatus {
    /// Open, acknowledged or in progress
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            IssueStatus::Open | IssueStatus::Acknowledged | IssueStatus::InProgress
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Acknowledged => "acknowledged",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-triggered status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueAction {
    Acknowledge,
    Start,
    Resolve,
    Ignore,
    Reopen,
}

impl FromStr for IssueAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "acknowledge" | "ack" => Ok(IssueAction::Acknowledge),
            "start" | "in_progress" => Ok(IssueAction::Start),
            "resolve" => Ok(IssueAction::Resolve),
            "ignore" => Ok(IssueAction::Ignore),
            "reopen" => Ok(IssueAction::Reopen),
            other => Err(format!("Unknown issue action: {}", other)),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("Cannot {action:?} an issue that is {from}")]
    InvalidTransition { from: IssueStatus, action: IssueAction },
}

/// A group of error entries sharing one fingerprint on one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub server_id: String,
    pub fingerprint: String,
    pub error_pattern: String,
    pub exception_type: Option<String>,
    pub title: String,
    pub sample_message: String,
    pub source: String,
    pub severity: Severity,
    pub category: IssueCategory,
    pub status: IssueStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub affected_users: u64,
    pub affected_sessions: u64,
    /// 0 to 100
    pub impact_score: f64,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Bumped by the store on every update
    pub version: u64,
}

impl Issue {
    /// Apply a user action, following the status table.
    ///
    /// open -> acknowledged -> in_progress; any active status -> resolved;
    /// any status -> ignored; resolved or ignored -> open.
    pub fn transition(
        &mut self,
        action: IssueAction,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(), IssueError> {
        use IssueStatus::*;

        let next = match (action, self.status) {
            (IssueAction::Acknowledge, Open) => Acknowledged,
            (IssueAction::Start, Acknowledged) => InProgress,
            (IssueAction::Resolve, status) if status.is_active() => Resolved,
            (IssueAction::Ignore, status) if status != Ignored => Ignored,
            (IssueAction::Reopen, Resolved | Ignored) => Open,
            (action, from) => return Err(IssueError::InvalidTransition { from, action }),
        };

        match next {
            Resolved => {
                self.resolved_by = Some(actor.to_string());
                self.resolved_at = Some(now);
            }
            Open => self.clear_resolution(),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Back to open after a recurrence, without a user action
    pub fn reopen_on_recurrence(&mut self) {
        self.status = IssueStatus::Open;
        self.clear_resolution();
    }

    fn clear_resolution(&mut self) {
        self.resolved_by = None;
        self.resolved_at = None;
    }
}

/// Link between an issue and one stored log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub issue_id: Uuid,
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user: Option<String>,
    pub session: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(status: IssueStatus) -> Issue {
        let now = Utc::now();
        Issue {
            id: Uuid::new_v4(),
            server_id: "sonarr".to_string(),
            fingerprint: "abc".to_string(),
            error_pattern: "database is locked".to_string(),
            exception_type: None,
            title: "Database is locked".to_string(),
            sample_message: "database is locked".to_string(),
            source: "Db".to_string(),
            severity: Severity::High,
            category: IssueCategory::Database,
            status,
            first_seen: now,
            last_seen: now,
            occurrence_count: 1,
            affected_users: 0,
            affected_sessions: 0,
            impact_score: 0.0,
            resolved_by: None,
            resolved_at: None,
            version: 0,
        }
    }

    #[test]
    fn test_happy_path_through_workflow() {
        let mut i = issue(IssueStatus::Open);
        let now = Utc::now();
        i.transition(IssueAction::Acknowledge, "alice", now).unwrap();
        assert_eq!(i.status, IssueStatus::Acknowledged);
        i.transition(IssueAction::Start, "alice", now).unwrap();
        assert_eq!(i.status, IssueStatus::InProgress);
        i.transition(IssueAction::Resolve, "alice", now).unwrap();
        assert_eq!(i.status, IssueStatus::Resolved);
        assert_eq!(i.resolved_by.as_deref(), Some("alice"));
        assert_eq!(i.resolved_at, Some(now));
    }

    #[test]
    fn test_reopen_clears_resolution() {
        let mut i = issue(IssueStatus::Open);
        i.transition(IssueAction::Resolve, "bob", Utc::now()).unwrap();
        i.transition(IssueAction::Reopen, "bob", Utc::now()).unwrap();
        assert_eq!(i.status, IssueStatus::Open);
        assert!(i.resolved_by.is_none());
        assert!(i.resolved_at.is_none());
    }

    #[test]
    fn test_rejected_transitions() {
        let now = Utc::now();
        let cases = [
            (IssueStatus::Ignored, IssueAction::Start),
            (IssueStatus::Ignored, IssueAction::Acknowledge),
            (IssueStatus::Ignored, IssueAction::Resolve),
            (IssueStatus::Resolved, IssueAction::Start),
            (IssueStatus::Resolved, IssueAction::Resolve),
            (IssueStatus::Open, IssueAction::Start),
            (IssueStatus::Open, IssueAction::Reopen),
            (IssueStatus::InProgress, IssueAction::Acknowledge),
        ];
        for (from, action) in cases {
            let mut i = issue(from);
            let err = i.transition(action, "x", now).unwrap_err();
            assert_eq!(err, IssueError::InvalidTransition { from, action });
            assert_eq!(i.status, from);
        }
    }

    #[test]
    fn test_ignore_from_any_status() {
        for from in [
            IssueStatus::Open,
            IssueStatus::Acknowledged,
            IssueStatus::InProgress,
            IssueStatus::Resolved,
        ] {
            let mut i = issue(from);
            i.transition(IssueAction::Ignore, "x", Utc::now()).unwrap();
            assert_eq!(i.status, IssueStatus::Ignored);
        }
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("ack".parse::<IssueAction>().unwrap(), IssueAction::Acknowledge);
        assert_eq!("Reopen".parse::<IssueAction>().unwrap(), IssueAction::Reopen);
        assert!("close".parse::<IssueAction>().is_err());
    }
}
