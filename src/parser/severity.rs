use super::entry::{LogLevel, ParsedLogEntry};
use tracing::debug;

/// Warning messages containing any of these are treated as errors
const CRITICAL_SUBSTRINGS: &[&str] = &[
    "disk space",
    "permission denied",
    "connection refused",
    "timeout",
    "timed out",
    "failed to import",
    "database is locked",
    "database locked",
];

/// Promote a warning to error when its message names a known-critical condition.
///
/// Returns true when the entry was promoted.
pub fn boost_severity(entry: &mut ParsedLogEntry) -> bool {
    if entry.level != LogLevel::Warn {
        return false;
    }

    let message = entry.message.to_lowercase();
    match CRITICAL_SUBSTRINGS.iter().find(|needle| message.contains(*needle)) {
        Some(needle) => {
            debug!(matched = *needle, "Boosting warning to error: {}", entry.message);
            entry.level = LogLevel::Error;
            entry.boosted = true;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(level: LogLevel, message: &str) -> ParsedLogEntry {
        ParsedLogEntry::new("srv", Utc::now(), level, "Test", message)
    }

    #[test]
    fn test_boosts_critical_warning() {
        let mut e = entry(LogLevel::Warn, "Not enough Disk Space on /data");
        assert!(boost_severity(&mut e));
        assert_eq!(e.level, LogLevel::Error);
        assert!(e.boosted);
        assert!(e.is_error());
    }

    #[test]
    fn test_leaves_other_levels_alone() {
        let mut info = entry(LogLevel::Info, "permission denied");
        assert!(!boost_severity(&mut info));
        assert_eq!(info.level, LogLevel::Info);

        let mut plain = entry(LogLevel::Warn, "Indexer returned no results");
        assert!(!boost_severity(&mut plain));
        assert_eq!(plain.level, LogLevel::Warn);
    }

    #[test]
    fn test_each_critical_substring() {
        for message in [
            "Permission denied: /tv",
            "Connection refused (localhost:8989)",
            "Request timeout after 100s",
            "Failed to import episode",
            "database is locked",
        ] {
            let mut e = entry(LogLevel::Warn, message);
            assert!(boost_severity(&mut e), "{message}");
        }
    }
}
