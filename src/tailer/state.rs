use super::identity::FileIdentity;
use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const STATE_FILE_NAME: &str = "tail_state.json";

/// Read progress for one file, persisted so tailing resumes after restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailState {
    pub server_id: String,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub file_size: u64,
    /// Never greater than `file_size`
    pub byte_offset: u64,
    pub line_number: u64,
    pub identity: Option<FileIdentity>,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Incremented each time the stream is reset by rotation or truncation
    #[serde(default)]
    pub generation: u64,
}

impl TailState {
    pub fn new(server_id: impl Into<String>, relative_path: impl Into<String>, absolute_path: PathBuf) -> Self {
        Self {
            server_id: server_id.into(),
            relative_path: relative_path.into(),
            absolute_path,
            file_size: 0,
            byte_offset: 0,
            line_number: 0,
            identity: None,
            last_modified: None,
            last_read_at: None,
            active: true,
            last_error: None,
            last_error_at: None,
            generation: 0,
        }
    }

    /// Compare the stored stream with what is on disk now.
    ///
    /// When the identity changed (and `trust_identity` is set) or the file
    /// shrank below the stored offset, the offset and line counter go back
    /// to zero and `RotationDetected` is returned. The reset happens once:
    /// afterwards the offset is within the new size.
    pub fn reconcile(
        &mut self,
        current: Option<FileIdentity>,
        size: u64,
        trust_identity: bool,
    ) -> IngestResult<()> {
        let identity_changed = trust_identity
            && matches!((self.identity, current), (Some(stored), Some(now)) if stored != now);
        let truncated = size < self.byte_offset;

        if identity_changed || truncated {
            return Err(self.reset_stream(current, size));
        }

        if current.is_some() {
            self.identity = current;
        }
        self.file_size = size;
        Ok(())
    }

    /// Start over on a new logical stream, returning the event describing it
    pub fn reset_stream(&mut self, current: Option<FileIdentity>, size: u64) -> IngestError {
        let previous_offset = self.byte_offset;
        self.byte_offset = 0;
        self.line_number = 0;
        self.identity = current;
        self.file_size = size;
        self.generation += 1;
        IngestError::RotationDetected {
            path: self.absolute_path.clone(),
            previous_offset,
            current_size: size,
        }
    }

    /// Record a processed checkpoint
    pub fn checkpoint(&mut self, offset: u64, line_number: u64, now: DateTime<Utc>) {
        // Bytes may have been appended after the last stat
        self.file_size = self.file_size.max(offset);
        self.byte_offset = offset;
        self.line_number = line_number;
        self.last_read_at = Some(now);
        self.active = true;
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: impl ToString, now: DateTime<Utc>) {
        self.active = false;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(now);
    }
}

/// Durable storage of tail checkpoints
#[async_trait]
pub trait TailStateStore: Send + Sync {
    async fn load(&self, path: &Path) -> IngestResult<Option<TailState>>;
    async fn save(&self, state: &TailState) -> IngestResult<()>;
    async fn list(&self) -> IngestResult<Vec<TailState>>;
}

/// Process-local store, used by tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryTailStateStore {
    states: parking_lot::Mutex<HashMap<PathBuf, TailState>>,
}

impl MemoryTailStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TailStateStore for MemoryTailStateStore {
    async fn load(&self, path: &Path) -> IngestResult<Option<TailState>> {
        Ok(self.states.lock().get(path).cloned())
    }

    async fn save(&self, state: &TailState) -> IngestResult<()> {
        self.states
            .lock()
            .insert(state.absolute_path.clone(), state.clone());
        Ok(())
    }

    async fn list(&self) -> IngestResult<Vec<TailState>> {
        Ok(self.states.lock().values().cloned().collect())
    }
}

/// Store that keeps every file's state in one JSON document on disk
#[derive(Debug)]
pub struct JsonTailStateStore {
    file: PathBuf,
    states: tokio::sync::Mutex<HashMap<PathBuf, TailState>>,
}

impl JsonTailStateStore {
    /// Open (or start) the state file under `dir`
    pub fn open(dir: &Path) -> IngestResult<Self> {
        fs::create_dir_all(dir).map_err(|e| IngestError::path_unavailable(dir, e))?;
        let file = dir.join(STATE_FILE_NAME);

        let states = if file.exists() {
            let content = fs::read_to_string(&file)?;
            let list: Vec<TailState> = serde_json::from_str(&content)?;
            info!("Loaded {} tail checkpoints from {}", list.len(), file.display());
            list.into_iter()
                .map(|s| (s.absolute_path.clone(), s))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            file,
            states: tokio::sync::Mutex::new(states),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file
    }

    async fn write(&self, states: &HashMap<PathBuf, TailState>) -> IngestResult<()> {
        let mut list: Vec<&TailState> = states.values().collect();
        list.sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));
        let json = serde_json::to_vec_pretty(&list)?;

        let tmp = self.file.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.file).await?;
        debug!("Persisted {} tail checkpoints", list.len());
        Ok(())
    }
}

#[async_trait]
impl TailStateStore for JsonTailStateStore {
    async fn load(&self, path: &Path) -> IngestResult<Option<TailState>> {
        Ok(self.states.lock().await.get(path).cloned())
    }

    async fn save(&self, state: &TailState) -> IngestResult<()> {
        let mut states = self.states.lock().await;
        states.insert(state.absolute_path.clone(), state.clone());
        self.write(&states).await
    }

    async fn list(&self) -> IngestResult<Vec<TailState>> {
        Ok(self.states.lock().await.values().cloned().collect())
    }
}
