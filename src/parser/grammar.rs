use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PIPE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^|]+)\|([A-Za-z]+)\|([^|]*)\|(.*)$").expect("valid regex"));

static JELLYFIN_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[([^\]]+)\]\s+\[([A-Za-z]+)\]\s+(?:\[\d+\]\s+)?([^:\s][^:]*?):\s?(.*)$").expect("valid regex")
});

static PLEX_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][a-z]{2} \d{1,2}, \d{4} \d{2}:\d{2}:\d{2}(?:\.\d+)?)\s+\[[^\]]+\]\s+([A-Za-z]+)\s+-\s+(.*)$")
        .expect("valid regex")
});

static COMMA_FRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2}:\d{2}:\d{2}),(\d+)").expect("valid regex"));

static PLEX_COMPONENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^\]]+)\]\s*(.*)$").expect("valid regex"));

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%b %d, %Y %H:%M:%S%.f",
];

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S%.f%:z"];

/// Supported on-disk log grammars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `timestamp|level|component|message`, written by the *arr family
    Pipe,
    /// `[timestamp] [LVL] [thread] Component: message`, Jellyfin and Emby
    Jellyfin,
    /// `Mon DD, YYYY HH:MM:SS.fff [thread] LEVEL - message`
    Plex,
}

impl LogFormat {
    pub fn grammar(&self) -> &'static dyn LineGrammar {
        match self {
            LogFormat::Pipe => &PipeGrammar,
            LogFormat::Jellyfin => &JellyfinGrammar,
            LogFormat::Plex => &PlexGrammar,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pipe" | "arr" => Ok(LogFormat::Pipe),
            "jellyfin" | "emby" => Ok(LogFormat::Jellyfin),
            "plex" => Ok(LogFormat::Plex),
            other => Err(format!("Unknown log format: {}", other)),
        }
    }
}

/// Fields of a line that starts a new entry
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub component: String,
    pub message: String,
}

/// Recognises the first line of an entry in one log format
pub trait LineGrammar: Send + Sync {
    /// Returns `None` when the line does not start a new entry
    fn parse_primary(&self, line: &str, date_pattern: Option<&str>) -> Option<PrimaryLine>;
}

pub struct PipeGrammar;

impl LineGrammar for PipeGrammar {
    fn parse_primary(&self, line: &str, date_pattern: Option<&str>) -> Option<PrimaryLine> {
        let caps = PIPE_LINE.captures(line)?;
        let timestamp = parse_timestamp(&caps[1], date_pattern)?;
        Some(PrimaryLine {
            timestamp,
            level: caps[2].to_string(),
            component: caps[3].trim().to_string(),
            message: caps[4].trim_end().to_string(),
        })
    }
}

pub struct JellyfinGrammar;

impl LineGrammar for JellyfinGrammar {
    fn parse_primary(&self, line: &str, date_pattern: Option<&str>) -> Option<PrimaryLine> {
        let caps = JELLYFIN_LINE.captures(line)?;
        let timestamp = parse_timestamp(&caps[1], date_pattern)?;
        Some(PrimaryLine {
            timestamp,
            level: caps[2].to_string(),
            component: caps[3].trim().to_string(),
            message: caps[4].trim_end().to_string(),
        })
    }
}

pub struct PlexGrammar;

impl LineGrammar for PlexGrammar {
    fn parse_primary(&self, line: &str, date_pattern: Option<&str>) -> Option<PrimaryLine> {
        let caps = PLEX_LINE.captures(line)?;
        let timestamp = parse_timestamp(&caps[1], date_pattern)?;
        let body = caps[3].trim_end();
        let (component, message) = match PLEX_COMPONENT.captures(body) {
            Some(inner) => (inner[1].to_string(), inner[2].to_string()),
            None => ("Plex Media Server".to_string(), body.to_string()),
        };
        Some(PrimaryLine {
            timestamp,
            level: caps[2].to_string(),
            component,
            message,
        })
    }
}

/// Parse a timestamp in any of the known forms, then the configured pattern.
///
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(text: &str, date_pattern: Option<&str>) -> Option<DateTime<Utc>> {
    let text = COMMA_FRACTION.replace(text.trim(), "$1.$2");

    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ZONED_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(&text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&text, format) {
            return Some(ts.and_utc());
        }
    }

    let pattern = date_pattern?;
    if let Ok(ts) = DateTime::parse_from_str(&text, pattern) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&text, pattern)
        .ok()
        .map(|ts| ts.and_utc())
}
