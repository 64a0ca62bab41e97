pub mod files;
pub mod paths;
pub mod validate;

pub use files::{compile_glob, discover_log_files, is_recent, modified_within};
pub use paths::{default_paths, detect_platform, expand_path, HostPlatform};
pub use validate::{validate_path, PathValidation};

use crate::config::{Encoding, ServerConfig};
use crate::parser::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// A discovered file together with what is needed to tail and parse it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTarget {
    pub server_id: String,
    pub path: PathBuf,
    /// Path relative to the configured root it was found under
    pub relative_path: String,
    pub format: LogFormat,
    pub encoding: Encoding,
    pub rotation: bool,
    pub date_pattern: Option<String>,
}

/// Discover the tailable files for one server, dropping stale ones
pub fn discover_targets(server: &ServerConfig, max_file_age_days: u64) -> Vec<LogTarget> {
    let roots = server.resolved_paths();
    let files = discover_log_files(&roots, &server.patterns());

    files
        .into_iter()
        .filter(|path| {
            let recent = is_recent(path, max_file_age_days);
            if !recent {
                debug!("Skipping {}: older than {} days", path.display(), max_file_age_days);
            }
            recent
        })
        .map(|path| LogTarget {
            server_id: server.id.clone(),
            relative_path: relative_to_roots(&path, &roots),
            path,
            format: server.format(),
            encoding: server.encoding,
            rotation: server.rotation,
            date_pattern: server.date_pattern.clone(),
        })
        .collect()
}

/// Discover targets across every enabled server
pub fn discover_all(servers: &[ServerConfig], max_file_age_days: u64) -> Vec<LogTarget> {
    servers
        .iter()
        .filter(|server| server.enabled)
        .flat_map(|server| discover_targets(server, max_file_age_days))
        .collect()
}

fn relative_to_roots(path: &std::path::Path, roots: &[String]) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    for root in roots {
        let root = root.trim_end_matches('/');
        if let Some(rest) = normalized.strip_prefix(root) {
            if let Some(rest) = rest.strip_prefix('/') {
                return rest.to_string();
            }
        }
    }
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or(normalized)
}
