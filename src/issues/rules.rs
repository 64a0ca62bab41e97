use super::model::{IssueCategory, Severity};
use crate::parser::LogLevel;
use chrono::{DateTime, Utc};

/// Longest generated title
const MAX_TITLE_CHARS: usize = 120;

/// Classification assigned to a new issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub severity: Severity,
    pub category: IssueCategory,
    pub rule: &'static str,
}

/// Trait for individual classification rules
trait Rule: Send + Sync {
    fn evaluate(&self, text: &str) -> Option<Classification>;
    fn name(&self) -> &'static str;
}

/// Matches when the lowercased message or exception contains any keyword
struct KeywordRule {
    name: &'static str,
    keywords: &'static [&'static str],
    severity: Severity,
    category: IssueCategory,
}

impl Rule for KeywordRule {
    fn evaluate(&self, text: &str) -> Option<Classification> {
        self.keywords
            .iter()
            .any(|keyword| text.contains(keyword))
            .then_some(Classification {
                severity: self.severity,
                category: self.category,
                rule: self.name,
            })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

// First match wins
const RULES: &[KeywordRule] = &[
    KeywordRule {
        name: "database_corruption",
        keywords: &["database disk image is malformed", "database corrupt", "file is not a database"],
        severity: Severity::Critical,
        category: IssueCategory::Database,
    },
    KeywordRule {
        name: "disk_full",
        keywords: &["disk space", "no space left", "disk full", "not enough space"],
        severity: Severity::Critical,
        category: IssueCategory::Storage,
    },
    KeywordRule {
        name: "database_locked",
        keywords: &["database is locked", "database locked", "sqlite", "database"],
        severity: Severity::High,
        category: IssueCategory::Database,
    },
    KeywordRule {
        name: "permission",
        keywords: &["permission denied", "access to the path", "unauthorizedaccess", "access is denied"],
        severity: Severity::High,
        category: IssueCategory::Permission,
    },
    KeywordRule {
        name: "import_failed",
        keywords: &["failed to import", "import failed", "couldn't import", "not a valid"],
        severity: Severity::Medium,
        category: IssueCategory::Import,
    },
    KeywordRule {
        name: "network",
        keywords: &[
            "connection refused",
            "timed out",
            "timeout",
            "name resolution",
            "no such host",
            "ssl",
            "unable to connect",
            "webexception",
            "httprequestexception",
        ],
        severity: Severity::Medium,
        category: IssueCategory::Network,
    },
    KeywordRule {
        name: "io",
        keywords: &["ioexception", "file not found", "directory not found", "could not find"],
        severity: Severity::Medium,
        category: IssueCategory::Storage,
    },
];

/// Classify a new issue from its message and exception type.
///
/// Falls back to the entry level when no rule matches: fatal entries are
/// high, everything else medium.
pub fn classify(message: &str, exception_type: Option<&str>, level: LogLevel) -> Classification {
    let text = format!("{} {}", message, exception_type.unwrap_or_default()).to_lowercase();

    for rule in RULES {
        if let Some(classification) = rule.evaluate(&text) {
            tracing::debug!("Rule {} classified issue", rule.name());
            return classification;
        }
    }

    Classification {
        severity: if level >= LogLevel::Fatal {
            Severity::High
        } else {
            Severity::Medium
        },
        category: IssueCategory::General,
        rule: "default",
    }
}

/// Human-readable title from the normalized pattern
pub fn generate_title(source: &str, error_pattern: &str, exception_type: Option<&str>) -> String {
    let short_type = exception_type.and_then(|t| t.rsplit('.').next());
    let body = match (error_pattern.is_empty(), short_type) {
        (true, Some(t)) => t.to_string(),
        (true, None) => "Unknown error".to_string(),
        (false, _) => error_pattern.to_string(),
    };

    let mut chars = body.chars();
    let mut title: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => body,
    };
    if let Some((idx, _)) = title.char_indices().nth(MAX_TITLE_CHARS) {
        title.truncate(idx);
        title.push_str("...");
    }

    if source.is_empty() || source == "unknown" {
        title
    } else {
        format!("{}: {}", source, title)
    }
}

/// Impact score in 0..=100.
///
/// Occurrences contribute up to 40 (log scale, saturating at 1000),
/// severity up to 30, affected users up to 20 (saturating at 50) and
/// recency up to 10. Non-decreasing in each of count, severity and users.
pub fn impact_score(
    occurrence_count: u64,
    severity: Severity,
    affected_users: u64,
    last_seen: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let occurrences = 40.0 * log_ratio(occurrence_count, 1000);
    let users = 20.0 * log_ratio(affected_users, 50);

    let age = now.signed_duration_since(last_seen);
    let recency = if age <= chrono::Duration::hours(1) {
        10.0
    } else if age <= chrono::Duration::hours(24) {
        7.0
    } else if age <= chrono::Duration::days(7) {
        4.0
    } else {
        0.0
    };

    let score = occurrences + severity.weight() + users + recency;
    (score.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

fn log_ratio(value: u64, saturation: u64) -> f64 {
    ((1.0 + value as f64).ln() / (1.0 + saturation as f64).ln()).min(1.0)
}
