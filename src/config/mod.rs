pub mod defaults;

use crate::error::{IngestError, IngestResult};
use crate::parser::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use defaults::PlatformPaths;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ingestion: IngestSettings,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Runtime-tunable ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub max_concurrent_tailers: usize,
    pub max_file_age_days: u64,
    pub tailer_start_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub discovery_interval_secs: u64,
    /// Upper bound on bytes read from one file per iteration
    pub max_read_bytes: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Idle time after which an open multi-line entry is emitted
    pub entry_flush_ms: u64,
    pub orphan_policy: OrphanPolicy,
    pub recurrence_policy: RecurrencePolicy,
    pub upsert_retries: u32,
    pub state_dir: Option<PathBuf>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tailers: 8,
            max_file_age_days: 7,
            tailer_start_delay_ms: 250,
            poll_interval_ms: 1000,
            discovery_interval_secs: 60,
            max_read_bytes: 1024 * 1024,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            entry_flush_ms: 2000,
            orphan_policy: OrphanPolicy::Drop,
            recurrence_policy: RecurrencePolicy::Accumulate,
            upsert_retries: 5,
            state_dir: None,
        }
    }
}

impl IngestSettings {
    /// Directory holding persisted tail state
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(env::temp_dir)
                .join("logarr")
        })
    }
}

/// What to do with a continuation line when no entry is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    #[default]
    Drop,
    StartEntry,
}

/// What a new occurrence does to a resolved or ignored issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePolicy {
    #[default]
    Accumulate,
    Reopen,
}

/// Kind of application producing the logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    Sonarr,
    Radarr,
    Lidarr,
    Readarr,
    Prowlarr,
    Bazarr,
    Jellyfin,
    Emby,
    Plex,
    Other,
}

impl ServerKind {
    pub fn default_format(&self) -> LogFormat {
        match self {
            ServerKind::Jellyfin | ServerKind::Emby => LogFormat::Jellyfin,
            ServerKind::Plex => LogFormat::Plex,
            _ => LogFormat::Pipe,
        }
    }

    pub fn default_patterns(&self) -> Vec<String> {
        let patterns: &[&str] = match self {
            ServerKind::Sonarr => &["sonarr*.txt"],
            ServerKind::Radarr => &["radarr*.txt"],
            ServerKind::Lidarr => &["lidarr*.txt"],
            ServerKind::Readarr => &["readarr*.txt"],
            ServerKind::Prowlarr => &["prowlarr*.txt"],
            ServerKind::Bazarr => &["bazarr.log*"],
            ServerKind::Jellyfin | ServerKind::Emby => &["log_*.log", "*.txt"],
            ServerKind::Plex => &["Plex Media Server*.log"],
            ServerKind::Other => &["*.log", "*.txt"],
        };
        patterns.iter().map(|p| p.to_string()).collect()
    }
}

/// Text encoding of a log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin1", alias = "iso-8859-1")]
    Latin1,
}

/// Per-server log source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub kind: ServerKind,

    /// Empty means the platform defaults for `kind`
    #[serde(default)]
    pub log_paths: Vec<String>,

    #[serde(default)]
    pub file_patterns: Vec<String>,

    #[serde(default)]
    pub encoding: Encoding,

    /// When false, file identity is not trusted for rotation detection
    #[serde(default = "default_true")]
    pub rotation: bool,

    /// chrono format for timestamps the grammar does not recognise
    #[serde(default)]
    pub date_pattern: Option<String>,

    #[serde(default)]
    pub format: Option<LogFormat>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn new(id: impl Into<String>, kind: ServerKind) -> Self {
        Self {
            id: id.into(),
            kind,
            log_paths: Vec::new(),
            file_patterns: Vec::new(),
            encoding: Encoding::default(),
            rotation: true,
            date_pattern: None,
            format: None,
            enabled: true,
        }
    }

    pub fn format(&self) -> LogFormat {
        self.format.unwrap_or_else(|| self.kind.default_format())
    }

    pub fn patterns(&self) -> Vec<String> {
        if self.file_patterns.is_empty() {
            self.kind.default_patterns()
        } else {
            self.file_patterns.clone()
        }
    }

    /// Configured paths, falling back to this host's defaults for the kind
    pub fn resolved_paths(&self) -> Vec<String> {
        if self.log_paths.is_empty() {
            crate::discovery::paths::default_paths(&PlatformPaths::for_kind(self.kind))
        } else {
            self.log_paths
                .iter()
                .map(|p| crate::discovery::paths::expand_path(p))
                .collect()
        }
    }
}

impl AppConfig {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("logarr")
            .join("config.yaml")
    }

    /// Load from a YAML file, then apply environment overrides
    pub fn load(path: &Path) -> IngestResult<Self> {
        Self::load_internal(path, true)
    }

    fn load_internal(path: &Path, load_dotenv: bool) -> IngestResult<Self> {
        if load_dotenv {
            let _ = dotenv::dotenv();
        }

        info!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path)
            .map_err(|e| IngestError::path_unavailable(path, e))?;
        let mut config = Self::from_yaml(&content)?;
        config.ingestion.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> IngestResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| IngestError::Configuration(format!("Invalid config: {}", e)))
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.ingestion.max_concurrent_tailers == 0 {
            return Err(IngestError::Configuration(
                "max_concurrent_tailers must be greater than 0".to_string(),
            ));
        }

        if self.ingestion.backoff_base_ms > self.ingestion.backoff_max_ms {
            return Err(IngestError::Configuration(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.ingestion.backoff_base_ms, self.ingestion.backoff_max_ms
            )));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.trim().is_empty() {
                return Err(IngestError::Configuration("Server id must not be empty".to_string()));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(IngestError::Configuration(format!(
                    "Duplicate server id: {}",
                    server.id
                )));
            }
            for pattern in &server.file_patterns {
                if pattern.trim().is_empty() {
                    return Err(IngestError::Configuration(format!(
                        "Server {} has an empty file pattern",
                        server.id
                    )));
                }
                if let Err(e) = crate::discovery::compile_glob(pattern) {
                    return Err(IngestError::Configuration(format!(
                        "Server {} has an unusable file pattern {:?}: {}",
                        server.id, pattern, e
                    )));
                }
            }
        }

        Ok(())
    }
}

impl IngestSettings {
    /// Override tunables from environment variables; unparsable values are ignored
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>("LOGARR_MAX_CONCURRENT_TAILERS") {
            if v > 0 {
                self.max_concurrent_tailers = v;
            }
        }
        if let Some(v) = env_parse::<u64>("LOGARR_MAX_FILE_AGE_DAYS") {
            self.max_file_age_days = v;
        }
        if let Some(v) = env_parse::<u64>("LOGARR_TAILER_START_DELAY_MS") {
            self.tailer_start_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("LOGARR_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
        if let Ok(dir) = env::var("LOGARR_STATE_DIR") {
            if !dir.is_empty() {
                self.state_dir = Some(PathBuf::from(crate::discovery::paths::expand_path(&dir)));
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!("Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
ingestion:
  max_concurrent_tailers: 4
  tailer_start_delay_ms: 0
  recurrence_policy: reopen
servers:
  - id: sonarr-main
    kind: sonarr
    log_paths: ["~/.config/Sonarr/logs"]
    encoding: utf-8
  - id: plex
    kind: plex
    rotation: false
    encoding: latin1
"#;

    fn clean_env() {
        env::remove_var("LOGARR_MAX_CONCURRENT_TAILERS");
        env::remove_var("LOGARR_MAX_FILE_AGE_DAYS");
        env::remove_var("LOGARR_TAILER_START_DELAY_MS");
        env::remove_var("LOGARR_POLL_INTERVAL_MS");
        env::remove_var("LOGARR_STATE_DIR");
    }

    #[test]
    fn test_parse_yaml_with_defaults() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.ingestion.max_concurrent_tailers, 4);
        assert_eq!(config.ingestion.max_file_age_days, 7);
        assert_eq!(config.ingestion.recurrence_policy, RecurrencePolicy::Reopen);
        assert_eq!(config.ingestion.orphan_policy, OrphanPolicy::Drop);
        assert_eq!(config.servers.len(), 2);

        let sonarr = &config.servers[0];
        assert_eq!(sonarr.format(), LogFormat::Pipe);
        assert_eq!(sonarr.patterns(), vec!["sonarr*.txt".to_string()]);
        assert!(sonarr.rotation);

        let plex = &config.servers[1];
        assert_eq!(plex.format(), LogFormat::Plex);
        assert_eq!(plex.encoding, Encoding::Latin1);
        assert!(!plex.rotation);
        assert!(plex.enabled);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut config = AppConfig::default();
        config.servers.push(ServerConfig::new("a", ServerKind::Radarr));
        config.servers.push(ServerConfig::new("a", ServerKind::Sonarr));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate server id"));
    }

    #[test]
    fn test_validate_rejects_zero_tailers() {
        let mut config = AppConfig::default();
        config.ingestion.max_concurrent_tailers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clean_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, SAMPLE).unwrap();

        env::set_var("LOGARR_MAX_CONCURRENT_TAILERS", "12");
        env::set_var("LOGARR_MAX_FILE_AGE_DAYS", "not-a-number");
        env::set_var("LOGARR_TAILER_START_DELAY_MS", "50");

        let config = AppConfig::load_internal(&path, false).unwrap();
        assert_eq!(config.ingestion.max_concurrent_tailers, 12);
        assert_eq!(config.ingestion.max_file_age_days, 7);
        assert_eq!(config.ingestion.tailer_start_delay_ms, 50);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        clean_env();
        let result = AppConfig::load_internal(Path::new("/definitely/not/here.yaml"), false);
        assert!(matches!(result, Err(IngestError::PathUnavailable { .. })));
    }
}
