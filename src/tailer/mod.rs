pub mod identity;
pub mod lease;
pub mod reader;
pub mod state;

pub use identity::FileIdentity;
pub use lease::{Lease, LeaseRegistry};
pub use reader::{LineSplitter, RawLine};
pub use state::{JsonTailStateStore, MemoryTailStateStore, TailState, TailStateStore};

use crate::config::{IngestSettings, ServerConfig};
use crate::discovery::{discover_all, modified_within, LogTarget};
use crate::error::{backoff_delay, IngestError, IngestResult};
use crate::parser::{parse_line, ParseContext, ParsedLogEntry};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a tail task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailExit {
    Cancelled,
    /// The file aged past `max_file_age_days`
    Stale,
    /// The file could not be read; `failures` counts consecutive attempts
    Unavailable { failures: u32 },
    /// The entry receiver was dropped
    Closed,
}

/// A target waiting for a tailer slot
#[derive(Debug, Clone)]
struct Pending {
    target: LogTarget,
    failures: u32,
}

enum Progress {
    Read { more: bool },
    Idle,
    Stale,
    Closed,
}

/// Bounded set of per-file tail tasks fed by periodic discovery.
///
/// Completed entries from every file are sent to one channel. Tailing stops
/// when the cancellation token fires; each task persists its checkpoint
/// before exiting.
///
/// A file that cannot be read gives up its slot and waits out a capped
/// backoff before it is queued again.
pub struct TailerPool {
    settings: IngestSettings,
    servers: Vec<ServerConfig>,
    store: Arc<dyn TailStateStore>,
    leases: LeaseRegistry,
    entries: mpsc::Sender<ParsedLogEntry>,
    cancel: CancellationToken,
    queue: VecDeque<Pending>,
    delayed: Vec<(Instant, Pending)>,
    known: HashSet<PathBuf>,
}

impl TailerPool {
    pub fn new(
        settings: IngestSettings,
        servers: Vec<ServerConfig>,
        store: Arc<dyn TailStateStore>,
        entries: mpsc::Sender<ParsedLogEntry>,
    ) -> Self {
        Self {
            settings,
            servers,
            store,
            leases: LeaseRegistry::new(),
            entries,
            cancel: CancellationToken::new(),
            queue: VecDeque::new(),
            delayed: Vec::new(),
            known: HashSet::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue targets not already queued or running. Returns how many were added.
    pub fn enqueue(&mut self, targets: Vec<LogTarget>) -> usize {
        let mut added = 0;
        for target in targets {
            if self.known.insert(target.path.clone()) {
                debug!(path = %target.path.display(), "Queued for tailing");
                self.queue.push_back(Pending { target, failures: 0 });
                added += 1;
            }
        }
        added
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Wait out the backoff for a file that could not be read
    fn delay_retry(&mut self, pending: Pending) {
        let delay = backoff_delay(
            Duration::from_millis(self.settings.backoff_base_ms),
            Duration::from_millis(self.settings.backoff_max_ms),
            pending.failures,
        );
        debug!(
            path = %pending.target.path.display(),
            attempt = pending.failures,
            retry_in_ms = delay.as_millis() as u64,
            "Retrying later"
        );
        self.delayed.push((Instant::now() + delay, pending));
    }

    /// Move retries whose backoff has elapsed back into the queue
    fn release_due(&mut self) {
        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.delayed).into_iter().partition(|(at, _)| *at <= now);
        self.delayed = waiting;
        self.queue.extend(due.into_iter().map(|(_, pending)| pending));
    }

    /// Forget retries for files discovery no longer finds, so they can be
    /// picked up again if they come back
    fn prune_delayed(&mut self, found: &HashSet<PathBuf>) {
        let known = &mut self.known;
        self.delayed.retain(|(_, pending)| {
            let keep = found.contains(&pending.target.path);
            if !keep {
                debug!(path = %pending.target.path.display(), "No longer discovered, dropping retry");
                known.remove(&pending.target.path);
            }
            keep
        });
    }

    /// Run discovery and tailing until cancelled
    pub async fn run(mut self) -> IngestResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_tailers.max(1)));
        let stagger = Duration::from_millis(self.settings.tailer_start_delay_ms);
        let mut discovery =
            tokio::time::interval(Duration::from_secs(self.settings.discovery_interval_secs.max(1)));
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();
        let mut tasks: JoinSet<(Pending, TailExit)> = JoinSet::new();
        let mut next_start = Instant::now();

        info!(
            max_tailers = self.settings.max_concurrent_tailers,
            servers = self.servers.len(),
            "Tailer pool started"
        );

        loop {
            let next_retry = self
                .delayed
                .iter()
                .map(|(at, _)| *at)
                .min()
                .unwrap_or_else(Instant::now);

            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = sleep_until(next_retry), if !self.delayed.is_empty() => self.release_due(),

                _ = discovery.tick(), if !self.servers.is_empty() => {
                    let servers = self.servers.clone();
                    let max_age = self.settings.max_file_age_days;
                    match tokio::task::spawn_blocking(move || discover_all(&servers, max_age)).await {
                        Ok(targets) => {
                            let found: HashSet<PathBuf> = targets.iter().map(|t| t.path.clone()).collect();
                            self.prune_delayed(&found);
                            let added = self.enqueue(targets);
                            debug!(found = found.len(), added, "Discovery pass finished");
                        }
                        Err(e) => warn!("Discovery pass failed: {}", e),
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((pending, exit)) => {
                            debug!(path = %pending.target.path.display(), ?exit, "Tail task finished");
                            match exit {
                                TailExit::Unavailable { failures } => {
                                    self.delay_retry(Pending { failures, ..pending });
                                }
                                TailExit::Closed => {
                                    warn!("Entry consumer is gone, stopping tailers");
                                    break;
                                }
                                TailExit::Cancelled | TailExit::Stale => {
                                    self.known.remove(&pending.target.path);
                                }
                            }
                        }
                        Err(e) => warn!("Tail task aborted: {}", e),
                    }
                }

                permit = acquire_after(Arc::clone(&semaphore), next_start), if !self.queue.is_empty() => {
                    let Ok(permit) = permit else { break };
                    let Some(pending) = self.queue.pop_front() else { continue };

                    match self.leases.try_acquire(&pending.target.path) {
                        Some(lease) => {
                            let task = TailTask {
                                target: pending.target.clone(),
                                failures: pending.failures,
                                settings: self.settings.clone(),
                                store: Arc::clone(&self.store),
                                entries: self.entries.clone(),
                                cancel: cancel.child_token(),
                            };
                            tasks.spawn(async move {
                                let exit = task.run(lease, permit).await;
                                (pending, exit)
                            });
                            next_start = Instant::now() + stagger;
                        }
                        None => {
                            debug!(path = %pending.target.path.display(), "Already tailed elsewhere, skipping");
                            self.known.remove(&pending.target.path);
                        }
                    }
                }
            }
        }

        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Tail task aborted during shutdown: {}", e);
            }
        }
        info!("Tailer pool stopped");
        Ok(())
    }
}

async fn acquire_after(
    semaphore: Arc<Semaphore>,
    at: Instant,
) -> Result<OwnedSemaphorePermit, AcquireError> {
    sleep_until(at).await;
    semaphore.acquire_owned().await
}

/// Tails one file. Owns its state, parser context and line buffer.
struct TailTask {
    target: LogTarget,
    /// Consecutive failed attempts before this one
    failures: u32,
    settings: IngestSettings,
    store: Arc<dyn TailStateStore>,
    entries: mpsc::Sender<ParsedLogEntry>,
    cancel: CancellationToken,
}

impl TailTask {
    async fn run(self, lease: Lease, _permit: OwnedSemaphorePermit) -> TailExit {
        let path = lease.path().to_path_buf();
        let mut state = match self.store.load(&path).await {
            Ok(Some(state)) => state,
            Ok(None) => self.fresh_state(),
            Err(e) => {
                warn!(path = %path.display(), "Could not load tail state, starting from 0: {}", e);
                self.fresh_state()
            }
        };
        let mut ctx = ParseContext::new(self.target.server_id.clone(), self.target.format)
            .with_file_path(path.to_string_lossy())
            .with_date_pattern(self.target.date_pattern.clone())
            .with_orphan_policy(self.settings.orphan_policy);
        let mut splitter =
            LineSplitter::new(self.target.encoding, state.byte_offset, state.line_number);

        info!(
            path = %path.display(),
            server = %self.target.server_id,
            offset = state.byte_offset,
            "Tailing file"
        );

        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms.max(1));
        let flush_after = Duration::from_millis(self.settings.entry_flush_ms);
        let mut failures = self.failures;
        let mut last_read = Instant::now();

        let exit = loop {
            if self.cancel.is_cancelled() {
                break TailExit::Cancelled;
            }

            let delay = match self.poll(&mut state, &mut ctx, &mut splitter).await {
                Ok(Progress::Read { more }) => {
                    failures = 0;
                    last_read = Instant::now();
                    if more {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    poll_interval
                }
                Ok(Progress::Idle) => {
                    failures = 0;
                    if ctx.has_open_entry() && last_read.elapsed() >= flush_after {
                        if let Some(entry) = ctx.flush() {
                            if !self.emit(entry).await {
                                break TailExit::Closed;
                            }
                        }
                        if let Err(e) = self.checkpoint(&mut state, &ctx, &splitter).await {
                            warn!(path = %path.display(), "Failed to persist checkpoint: {}", e);
                        }
                    }
                    poll_interval
                }
                Ok(Progress::Stale) => break TailExit::Stale,
                Ok(Progress::Closed) => break TailExit::Closed,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(path = %path.display(), attempt = failures, "Tailing failed: {}", e);
                    // The stored offset stays at the last checkpoint, so an
                    // entry left open here is re-read in full on retry
                    state.record_error(&e, Utc::now());
                    if let Err(e) = self.store.save(&state).await {
                        warn!(path = %path.display(), "Failed to persist tail state: {}", e);
                    }
                    return TailExit::Unavailable { failures };
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break TailExit::Cancelled,
                _ = sleep(delay) => {}
            }
        };

        if exit == TailExit::Stale {
            info!(
                path = %path.display(),
                "No longer tailing: not modified in {} days",
                self.settings.max_file_age_days
            );
            if let Some(entry) = ctx.flush() {
                self.emit(entry).await;
            }
        }

        let (offset, line_number) = checkpoint_position(&ctx, &splitter);
        state.checkpoint(offset, line_number, Utc::now());
        if exit == TailExit::Stale {
            state.active = false;
        }
        if let Err(e) = self.store.save(&state).await {
            warn!(path = %path.display(), "Failed to persist final checkpoint: {}", e);
        }
        exit
    }

    fn fresh_state(&self) -> TailState {
        TailState::new(
            self.target.server_id.clone(),
            self.target.relative_path.clone(),
            self.target.path.clone(),
        )
    }

    /// One iteration: reconcile with the file on disk, then read a bounded chunk
    async fn poll(
        &self,
        state: &mut TailState,
        ctx: &mut ParseContext,
        splitter: &mut LineSplitter,
    ) -> IngestResult<Progress> {
        let path = &self.target.path;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| IngestError::path_unavailable(path, e))?;

        if let Ok(modified) = metadata.modified() {
            let modified_at = DateTime::<Utc>::from(modified);
            state.last_modified = Some(modified_at);
            ctx.set_fallback_timestamp(modified_at);
            if !modified_within(modified, self.settings.max_file_age_days) {
                return Ok(Progress::Stale);
            }
        }

        let size = metadata.len();
        let identity = FileIdentity::from_metadata(&metadata);
        let read_from = splitter.consumed() + splitter.pending_len() as u64;

        let reconciled = match state.reconcile(identity, size, self.target.rotation) {
            Ok(()) if size < read_from => Err(state.reset_stream(identity, size)),
            other => other,
        };
        if let Err(event) = reconciled {
            info!(path = %path.display(), "{}", event);
            // Whatever the previous stream left open is complete
            if let Some(entry) = ctx.flush() {
                if !self.emit(entry).await {
                    return Ok(Progress::Closed);
                }
            }
            ctx.reset();
            splitter.reset();
            self.store.save(state).await?;
            return Ok(Progress::Read { more: size > 0 });
        }

        if read_from >= size {
            return Ok(Progress::Idle);
        }

        let want = (size - read_from).min(self.settings.max_read_bytes.max(1) as u64) as usize;
        let chunk = reader::read_chunk(path, read_from, want).await?;
        if chunk.is_empty() {
            return Ok(Progress::Idle);
        }
        let more = read_from + (chunk.len() as u64) < size;

        for line in splitter.push(&chunk) {
            let outcome = parse_line(&line.text, line.position, ctx);
            if let Some(entry) = outcome.completed {
                if !self.emit(entry).await {
                    return Ok(Progress::Closed);
                }
            }
        }

        self.checkpoint(state, ctx, splitter).await?;
        Ok(Progress::Read { more })
    }

    /// Persist the offset up to which every entry has been handed off
    async fn checkpoint(
        &self,
        state: &mut TailState,
        ctx: &ParseContext,
        splitter: &LineSplitter,
    ) -> IngestResult<()> {
        let (offset, line_number) = checkpoint_position(ctx, splitter);
        state.checkpoint(offset, line_number, Utc::now());
        self.store.save(state).await
    }

    async fn emit(&self, entry: ParsedLogEntry) -> bool {
        self.entries.send(entry).await.is_ok()
    }
}

/// The checkpoint never passes the first line of a still-open entry, so a
/// restart re-reads it in full.
fn checkpoint_position(ctx: &ParseContext, splitter: &LineSplitter) -> (u64, u64) {
    match ctx.open_position() {
        Some(open) => (open.offset, open.line_number.saturating_sub(1)),
        None => (splitter.consumed(), splitter.last_line()),
    }
}
