use crate::store::StoreError;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors raised along the ingestion pipeline.
///
/// Only `Io`, `Serialization`, `Configuration` and an unavailable store are
/// ever fatal to a caller; the remaining variants describe conditions that a
/// single tailer or entry recovers from without affecting other files or
/// servers.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Path unavailable: {path}: {reason}")]
    PathUnavailable { path: PathBuf, reason: String },

    #[error("Rotation detected on {path}: offset {previous_offset} reset (size {current_size})")]
    RotationDetected {
        path: PathBuf,
        previous_offset: u64,
        current_size: u64,
    },

    #[error("Unrecognized line {line_number} in {path}")]
    ParseUnrecognized { path: String, line_number: u64 },

    #[error("Duplicate entry {dedup_key} for server {server_id}")]
    DuplicateEntry { server_id: String, dedup_key: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IngestError {
    pub fn path_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::PathUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the condition is expected during normal operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            IngestError::Io(_)
                | IngestError::Serialization(_)
                | IngestError::Configuration(_)
                | IngestError::Store(StoreError::Unavailable(_))
        )
    }
}

/// Exponential delay for the given 1-based attempt, capped at `max`
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, max, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, max, 5), max);
        assert_eq!(backoff_delay(base, max, 200), max);
    }

    #[test]
    fn test_recoverable_variants() {
        assert!(IngestError::path_unavailable("/missing", "not found").is_recoverable());
        assert!(IngestError::ConstraintViolation("fingerprint".into()).is_recoverable());
        assert!(!IngestError::Configuration("bad".into()).is_recoverable());
    }

    #[test]
    fn test_display_includes_path() {
        let err = IngestError::RotationDetected {
            path: PathBuf::from("/logs/sonarr.txt"),
            previous_offset: 120,
            current_size: 10,
        };
        let text = err.to_string();
        assert!(text.contains("/logs/sonarr.txt"));
        assert!(text.contains("120"));
    }
}
