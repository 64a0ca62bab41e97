use crate::cli::utils::load_config;
use crate::ingest::IngestPipeline;
use crate::issues::{BroadcastPublisher, IssueEvent};
use crate::store::MemoryStore;
use crate::tailer::{JsonTailStateStore, TailerPool};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

const ENTRY_CHANNEL_CAPACITY: usize = 1024;
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub async fn handle_run_command(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let settings = config.ingestion.clone();
    let servers: Vec<_> = config.enabled_servers().cloned().collect();
    if servers.is_empty() {
        warn!("No enabled servers configured, nothing to tail");
        return Ok(());
    }

    let state_dir = settings.resolved_state_dir();
    let state_store = JsonTailStateStore::open(&state_dir)
        .with_context(|| format!("Failed to open tail state in {}", state_dir.display()))?;
    info!("Tail checkpoints at {}", state_store.file_path().display());

    let (tx, rx) = mpsc::channel(ENTRY_CHANNEL_CAPACITY);
    let pool = TailerPool::new(settings.clone(), servers, Arc::new(state_store), tx);
    let cancel = pool.cancellation_token();

    let publisher = Arc::new(BroadcastPublisher::new(EVENT_CHANNEL_CAPACITY));
    let events = tokio::spawn(log_issue_events(publisher.subscribe()));
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(MemoryStore::new()),
        publisher,
        &settings,
    ));

    let ingest = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(rx).await })
    };

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
            cancel.cancel();
        }
    });

    let pool_result = pool.run().await;
    let processed = ingest.await?;
    events.abort();

    let mut health: Vec<_> = pipeline.server_health().into_iter().collect();
    health.sort_by(|a, b| a.0.cmp(&b.0));
    for (server, h) in health {
        info!(
            server = %server,
            entries = h.entries,
            duplicates = h.duplicates,
            errors = h.errors_correlated,
            last_error = h.last_error.as_deref().unwrap_or("-"),
            "Server summary"
        );
    }
    info!("Processed {} entries", processed);

    pool_result.context("Tailer pool failed")
}

async fn log_issue_events(mut events: broadcast::Receiver<IssueEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let issue = event.issue();
                let kind = match &event {
                    IssueEvent::Created(_) => "created",
                    IssueEvent::Updated(_) => "updated",
                };
                info!(
                    server = %issue.server_id,
                    severity = issue.severity.as_str(),
                    count = issue.occurrence_count,
                    impact = issue.impact_score,
                    "Issue {}: {}",
                    kind,
                    issue.title
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Issue event log fell behind, skipped {}", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
