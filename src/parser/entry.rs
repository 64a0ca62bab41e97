use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log entry, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Map a level token; unknown tokens are treated as info
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "trace" | "trc" | "verbose" | "vrb" => LogLevel::Trace,
            "debug" | "dbg" => LogLevel::Debug,
            "info" | "inf" | "information" => LogLevel::Info,
            "warn" | "warning" | "wrn" => LogLevel::Warn,
            "error" | "err" => LogLevel::Error,
            "fatal" | "ftl" | "critical" | "crit" => LogLevel::Fatal,
            _ => LogLevel::Info,
        }
    }

    pub fn is_error(&self) -> bool {
        *self >= LogLevel::Error
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

/// A normalised log entry, possibly spanning several physical lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLogEntry {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub raw: String,
    pub exception_type: Option<String>,
    pub stack_trace: Option<String>,
    pub file_path: Option<String>,
    pub line_number: Option<u64>,
    /// Assigned by the deduplicator before storage
    pub dedup_key: String,
    pub activity_id: Option<String>,
    pub user: Option<String>,
    pub session: Option<String>,
    /// Set when a warning was promoted to error
    #[serde(default)]
    pub boosted: bool,
}

impl ParsedLogEntry {
    pub fn new(
        server_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            server_id: server_id.into(),
            timestamp,
            level,
            raw: message.clone(),
            message,
            source: source.into(),
            exception_type: None,
            stack_trace: None,
            file_path: None,
            line_number: None,
            dedup_key: String::new(),
            activity_id: None,
            user: None,
            session: None,
            boosted: false,
        }
    }

    pub fn with_origin(mut self, file_path: impl Into<String>, line_number: u64) -> Self {
        self.file_path = Some(file_path.into());
        self.line_number = Some(line_number);
        self
    }

    /// Mark the entry as coming from an API source with its own activity id
    pub fn with_activity_id(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    pub fn is_error(&self) -> bool {
        self.level.is_error()
    }
}
