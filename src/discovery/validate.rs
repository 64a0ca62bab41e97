use super::paths::expand_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Number of directory entries returned by default
pub const DEFAULT_LISTING_LIMIT: usize = 20;

/// Result of probing a configured log path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathValidation {
    pub path: String,
    pub accessible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl PathValidation {
    fn failed(path: String, error: String) -> Self {
        Self {
            path,
            accessible: false,
            error: Some(error),
            files: None,
        }
    }
}

/// Check that a path exists and is readable.
///
/// For a directory the first `limit` entry names (sorted) are returned, for a
/// file its own name.
pub fn validate_path(path: &str, limit: usize) -> PathValidation {
    let expanded = expand_path(path);
    let target = Path::new(&expanded);

    let metadata = match fs::metadata(target) {
        Ok(m) => m,
        Err(e) => return PathValidation::failed(expanded, e.to_string()),
    };

    if metadata.is_file() {
        // Opening proves read permission
        if let Err(e) = fs::File::open(target) {
            return PathValidation::failed(expanded, e.to_string());
        }
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| expanded.clone());
        return PathValidation {
            path: expanded,
            accessible: true,
            error: None,
            files: Some(vec![name]),
        };
    }

    match fs::read_dir(target) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names.truncate(limit);
            PathValidation {
                path: expanded,
                accessible: true,
                error: None,
                files: Some(names),
            }
        }
        Err(e) => PathValidation::failed(expanded, e.to_string()),
    }
}
