use crate::error::IngestError;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Compile a `*`/`?` glob into an anchored, case-insensitive regex.
///
/// Every other character is matched literally.
pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match compile_glob(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Ignoring unusable file pattern {:?}: {}", pattern, e);
                None
            }
        })
        .collect()
}

/// Find log files under the configured paths.
///
/// Directories are listed one level deep and their entries kept when the
/// file name matches any pattern; paths naming a file are accepted as-is.
/// Missing or unreadable paths are logged and skipped. The result is
/// deduplicated and ordered by modification time, newest first.
pub fn discover_log_files(paths: &[String], patterns: &[String]) -> Vec<PathBuf> {
    let matchers = compile_patterns(patterns);
    let mut seen = HashSet::new();
    let mut found: Vec<(PathBuf, Option<SystemTime>)> = Vec::new();

    for raw in paths {
        let path = PathBuf::from(raw);
        let metadata = match path.metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!("{}", IngestError::path_unavailable(&path, e));
                continue;
            }
        };

        if metadata.is_file() {
            if seen.insert(path.clone()) {
                found.push((path, metadata.modified().ok()));
            }
            continue;
        }

        if !metadata.is_dir() {
            debug!("Skipping {}: neither file nor directory", path.display());
            continue;
        }

        for candidate in list_matching(&path, &matchers) {
            if seen.insert(candidate.0.clone()) {
                found.push(candidate);
            }
        }
    }

    // Files without a readable mtime sort last
    found.sort_by(|a, b| b.1.cmp(&a.1));
    found.into_iter().map(|(path, _)| path).collect()
}

fn list_matching(dir: &Path, matchers: &[Regex]) -> Vec<(PathBuf, Option<SystemTime>)> {
    let mut matches = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot read entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy();
        if !matchers.iter().any(|re| re.is_match(&name)) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.is_file() => {
                matches.push((entry.path().to_path_buf(), meta.modified().ok()));
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
        }
    }

    matches
}

/// Whether a file was modified within `max_age_days`.
///
/// A zero age disables the filter; unreadable metadata counts as stale.
pub fn is_recent(path: &Path, max_age_days: u64) -> bool {
    match path.metadata().and_then(|m| m.modified()) {
        Ok(modified) => modified_within(modified, max_age_days),
        Err(_) => max_age_days == 0,
    }
}

/// Whether a modification time falls within the age limit; 0 disables it
pub fn modified_within(modified: SystemTime, max_age_days: u64) -> bool {
    if max_age_days == 0 {
        return true;
    }
    let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age <= max_age,
        // Modified in the future
        Err(_) => true,
    }
}
