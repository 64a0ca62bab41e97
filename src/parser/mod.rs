pub mod continuation;
pub mod entry;
pub mod grammar;
pub mod severity;

pub use continuation::{classify, ContinuationKind};
pub use entry::{LogLevel, ParsedLogEntry};
pub use grammar::{LineGrammar, LogFormat, PrimaryLine};
pub use severity::boost_severity;

use crate::config::OrphanPolicy;
use crate::error::IngestError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Upper bound on the exception message folded into an entry's message
const MAX_EXCEPTION_MESSAGE_CHARS: usize = 200;

static USER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\buser(?:name)?\s*[=:]\s*['"]?([\w.@-]+)"#).expect("valid regex")
});
static SESSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bsession(?:[_ ]?id)?\s*[=:]\s*['"]?([\w-]+)"#).expect("valid regex")
});

/// Where a physical line sits in its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinePosition {
    /// 1-based line number
    pub line_number: u64,
    /// Byte offset of the first byte of the line
    pub offset: u64,
}

/// Per-file parser state: the open entry and its buffered continuation lines.
///
/// Owned by exactly one tailer; never shared between files.
#[derive(Debug)]
pub struct ParseContext {
    server_id: String,
    file_path: Option<String>,
    format: LogFormat,
    date_pattern: Option<String>,
    orphan_policy: OrphanPolicy,
    open: Option<ParsedLogEntry>,
    open_position: Option<LinePosition>,
    continuation: Vec<String>,
    /// Timestamp of the last entry opened from a primary line
    last_timestamp: Option<DateTime<Utc>>,
    fallback_timestamp: Option<DateTime<Utc>>,
}

/// Result of feeding one line to the parser
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// The previous entry, completed because this line started a new one
    pub completed: Option<ParsedLogEntry>,
    /// The line was appended to the open entry
    pub is_continuation: bool,
    /// The line opened a new entry
    pub opened: bool,
    /// A continuation line arrived with no open entry and was discarded
    pub dropped: bool,
}

impl ParseContext {
    pub fn new(server_id: impl Into<String>, format: LogFormat) -> Self {
        Self {
            server_id: server_id.into(),
            file_path: None,
            format,
            date_pattern: None,
            orphan_policy: OrphanPolicy::default(),
            open: None,
            open_position: None,
            continuation: Vec::new(),
            last_timestamp: None,
            fallback_timestamp: None,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_date_pattern(mut self, pattern: Option<String>) -> Self {
        self.date_pattern = pattern;
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    /// Timestamp for entries opened from an orphan line before any primary
    /// line has been seen, usually the file's modification time
    pub fn set_fallback_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.fallback_timestamp = Some(timestamp);
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn has_open_entry(&self) -> bool {
        self.open.is_some()
    }

    /// Position of the first line of the still-open entry
    pub fn open_position(&self) -> Option<LinePosition> {
        self.open_position
    }

    /// Complete the open entry, folding in any buffered continuation lines
    pub fn flush(&mut self) -> Option<ParsedLogEntry> {
        let mut entry = self.open.take()?;
        self.open_position = None;
        let lines = std::mem::take(&mut self.continuation);
        if lines.is_empty() {
            return Some(entry);
        }

        let trace = lines.join("\n");
        if let Some((exception_type, message)) = continuation::extract_exception(&lines) {
            entry.exception_type = Some(exception_type);
            if let Some(message) = message {
                let short = truncate_chars(&message, MAX_EXCEPTION_MESSAGE_CHARS);
                if !entry.message.contains(short) {
                    entry.message = format!("{}: {}", entry.message, short);
                }
            }
        }
        entry.raw = format!("{}\n{}", entry.raw, trace);
        entry.stack_trace = Some(trace);
        Some(entry)
    }

    /// Discard all state, used when the underlying stream is replaced
    pub fn reset(&mut self) {
        self.open = None;
        self.open_position = None;
        self.continuation.clear();
        self.last_timestamp = None;
    }

    /// Orphan entries inherit a timestamp from the stream so a replay of the
    /// same bytes yields the same dedup key
    fn orphan_timestamp(&self) -> DateTime<Utc> {
        self.last_timestamp
            .or(self.fallback_timestamp)
            .unwrap_or_else(Utc::now)
    }

    fn open_entry(&mut self, entry: ParsedLogEntry, position: LinePosition) {
        self.open = Some(entry);
        self.open_position = Some(position);
    }

    fn build_entry(&self, primary: PrimaryLine, line: &str, position: LinePosition) -> ParsedLogEntry {
        let mut entry = ParsedLogEntry::new(
            self.server_id.clone(),
            primary.timestamp,
            LogLevel::from_token(&primary.level),
            primary.component,
            primary.message,
        )
        .with_raw(line);
        if let Some(path) = &self.file_path {
            entry = entry.with_origin(path.clone(), position.line_number);
        }
        entry.user = capture(&USER_TOKEN, &entry.message);
        entry.session = capture(&SESSION_TOKEN, &entry.message);
        entry
    }
}

/// Feed one physical line (without its newline) to the parser.
///
/// A line matching the primary grammar completes the previous entry and
/// opens a new one; any other non-blank line is buffered as a continuation
/// of the open entry.
pub fn parse_line(line: &str, position: LinePosition, ctx: &mut ParseContext) -> ParseOutcome {
    let line = line.trim_end_matches('\r');
    let grammar = ctx.format.grammar();

    if let Some(primary) = grammar.parse_primary(line, ctx.date_pattern.as_deref()) {
        let completed = ctx.flush();
        ctx.last_timestamp = Some(primary.timestamp);
        let entry = ctx.build_entry(primary, line, position);
        ctx.open_entry(entry, position);
        return ParseOutcome {
            completed,
            opened: true,
            ..Default::default()
        };
    }

    let Some(kind) = classify(line) else {
        return ParseOutcome::default();
    };

    if ctx.open.is_some() {
        ctx.continuation.push(line.to_string());
        return ParseOutcome {
            is_continuation: true,
            ..Default::default()
        };
    }

    match ctx.orphan_policy {
        OrphanPolicy::Drop => {
            let unrecognized = IngestError::ParseUnrecognized {
                path: ctx.file_path.clone().unwrap_or_default(),
                line_number: position.line_number,
            };
            debug!(?kind, "Dropping continuation line with no open entry: {}", unrecognized);
            ParseOutcome {
                dropped: true,
                ..Default::default()
            }
        }
        OrphanPolicy::StartEntry => {
            let mut entry = ParsedLogEntry::new(
                ctx.server_id.clone(),
                ctx.orphan_timestamp(),
                LogLevel::Info,
                "unknown",
                line.trim(),
            )
            .with_raw(line);
            if let Some(path) = &ctx.file_path {
                entry = entry.with_origin(path.clone(), position.line_number);
            }
            ctx.open_entry(entry, position);
            ParseOutcome {
                opened: true,
                ..Default::default()
            }
        }
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|caps| caps[1].to_string())
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::dedup_key;
    use chrono::TimeZone;

    fn pos(n: u64) -> LinePosition {
        LinePosition {
            line_number: n,
            offset: n * 100,
        }
    }

    fn ctx() -> ParseContext {
        ParseContext::new("sonarr", LogFormat::Pipe).with_file_path("/logs/sonarr.txt")
    }

    #[test]
    fn test_single_line_entries() {
        let mut ctx = ctx();
        let first = parse_line("2024-01-15 10:00:00.0|Info|RssSync|Starting RSS Sync", pos(1), &mut ctx);
        assert!(first.opened);
        assert!(first.completed.is_none());

        let second = parse_line("2024-01-15 10:00:01.0|Info|RssSync|RSS Sync Completed", pos(2), &mut ctx);
        let done = second.completed.unwrap();
        assert_eq!(done.message, "Starting RSS Sync");
        assert_eq!(done.source, "RssSync");
        assert_eq!(done.line_number, Some(1));
        assert_eq!(done.file_path.as_deref(), Some("/logs/sonarr.txt"));
        assert!(done.stack_trace.is_none());
    }

    #[test]
    fn test_stack_trace_stitched_into_previous_entry() {
        let mut ctx = ctx();
        parse_line("2024-01-15 10:00:00.0|Error|DownloadService|Couldn't grab release", pos(1), &mut ctx);

        let continuation = vec![
            "System.Net.WebException: Connection refused: 'http://qbit:8080/api'",
            "   at NzbDrone.Core.Download.Clients.QBittorrent.Proxy.Execute()",
            " ---> System.Net.Sockets.SocketException (111): Connection refused",
            "   --- End of inner exception stack trace ---",
            "   at NzbDrone.Core.Download.DownloadService.DownloadReport()",
        ];
        for (i, line) in continuation.iter().enumerate() {
            let outcome = parse_line(line, pos(2 + i as u64), &mut ctx);
            assert!(outcome.is_continuation);
            assert!(outcome.completed.is_none());
        }

        let outcome = parse_line("2024-01-15 10:00:05.0|Info|RssSync|Next", pos(7), &mut ctx);
        let entry = outcome.completed.unwrap();
        assert_eq!(entry.stack_trace.as_deref(), Some(continuation.join("\n").as_str()));
        assert_eq!(entry.exception_type.as_deref(), Some("System.Net.WebException"));
        assert_eq!(
            entry.message,
            "Couldn't grab release: Connection refused: 'http://qbit:8080/api'"
        );
        assert_eq!(entry.level, LogLevel::Error);
        assert!(entry.raw.starts_with("2024-01-15 10:00:00.0|Error|"));
        assert!(entry.raw.ends_with("DownloadReport()"));
    }

    #[test]
    fn test_exception_message_not_duplicated() {
        let mut ctx = ctx();
        parse_line("2024-01-15 10:00:00.0|Error|Db|database is locked", pos(1), &mut ctx);
        parse_line("System.Data.SQLite.SQLiteException: database is locked", pos(2), &mut ctx);
        let entry = ctx.flush().unwrap();
        assert_eq!(entry.message, "database is locked");
        assert_eq!(entry.exception_type.as_deref(), Some("System.Data.SQLite.SQLiteException"));
    }

    #[test]
    fn test_orphan_continuation_dropped() {
        let mut ctx = ctx();
        let outcome = parse_line("   at Some.Frame()", pos(1), &mut ctx);
        assert!(outcome.dropped);
        assert!(!ctx.has_open_entry());
    }

    #[test]
    fn test_orphan_continuation_starts_entry() {
        let mut ctx = ctx().with_orphan_policy(OrphanPolicy::StartEntry);
        let outcome = parse_line("garbage line from a partial write", pos(1), &mut ctx);
        assert!(outcome.opened);
        assert!(!outcome.dropped);

        let entry = ctx.flush().unwrap();
        assert_eq!(entry.source, "unknown");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "garbage line from a partial write");
    }

    #[test]
    fn test_orphan_entry_inherits_previous_timestamp() {
        let mut ctx = ctx().with_orphan_policy(OrphanPolicy::StartEntry);
        parse_line("2024-01-15 10:00:00.0|Info|RssSync|Done", pos(1), &mut ctx);
        ctx.flush();

        parse_line("garbage line from a partial write", pos(2), &mut ctx);
        let orphan = ctx.flush().unwrap();
        assert_eq!(orphan.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());

        // Same bytes parsed again give the same dedup key
        let mut replay = self::ctx().with_orphan_policy(OrphanPolicy::StartEntry);
        parse_line("2024-01-15 10:00:00.0|Info|RssSync|Done", pos(1), &mut replay);
        replay.flush();
        parse_line("garbage line from a partial write", pos(2), &mut replay);
        assert_eq!(dedup_key(&replay.flush().unwrap()), dedup_key(&orphan));
    }

    #[test]
    fn test_orphan_entry_uses_fallback_before_any_primary_line() {
        let mtime = Utc.with_ymd_and_hms(2024, 1, 14, 23, 59, 0).unwrap();
        let mut ctx = ctx().with_orphan_policy(OrphanPolicy::StartEntry);
        ctx.set_fallback_timestamp(mtime);

        parse_line("   at Some.Frame()", pos(1), &mut ctx);
        assert_eq!(ctx.flush().unwrap().timestamp, mtime);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut ctx = ctx();
        parse_line("2024-01-15 10:00:00.0|Error|Db|boom", pos(1), &mut ctx);
        let outcome = parse_line("", pos(2), &mut ctx);
        assert!(!outcome.is_continuation);
        let entry = ctx.flush().unwrap();
        assert!(entry.stack_trace.is_none());
    }

    #[test]
    fn test_open_position_tracks_entry_start() {
        let mut ctx = ctx();
        assert!(ctx.open_position().is_none());
        parse_line("2024-01-15 10:00:00.0|Error|Db|boom", pos(3), &mut ctx);
        parse_line("   at Frame()", pos(4), &mut ctx);
        assert_eq!(ctx.open_position(), Some(pos(3)));
        ctx.flush();
        assert!(ctx.open_position().is_none());
    }

    #[test]
    fn test_user_and_session_extracted() {
        let mut ctx = ParseContext::new("plex", LogFormat::Plex);
        parse_line(
            "Jan 15, 2024 10:30:00.123 [1402] ERROR - Transcode failed for user=alice sessionId=abc-123",
            pos(1),
            &mut ctx,
        );
        let entry = ctx.flush().unwrap();
        assert_eq!(entry.user.as_deref(), Some("alice"));
        assert_eq!(entry.session.as_deref(), Some("abc-123"));
        assert!(entry.file_path.is_none());
    }

    #[test]
    fn test_crlf_lines() {
        let mut ctx = ctx();
        parse_line("2024-01-15 10:00:00.0|Warn|Disk|low space\r", pos(1), &mut ctx);
        let entry = ctx.flush().unwrap();
        assert_eq!(entry.message, "low space");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
