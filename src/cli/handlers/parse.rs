use crate::config::{Encoding, IngestSettings};
use crate::ingest::IngestPipeline;
use crate::issues::{Issue, RecordingPublisher};
use crate::parser::{parse_line, LogFormat, ParseContext, ParsedLogEntry};
use crate::store::{IngestStore, MemoryStore};
use crate::tailer::LineSplitter;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub async fn handle_parse_command(
    file: PathBuf,
    format: LogFormat,
    server: String,
    issues: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let entries = parse_bytes(&bytes, &file, format, &server);
    info!("Parsed {} entries from {}", entries.len(), file.display());

    if !issues {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let pipeline = IngestPipeline::new(store.clone(), publisher.clone(), &IngestSettings::default());
    for entry in entries {
        pipeline.process(entry).await?;
    }
    pipeline.retry_requeued().await;

    info!("{} issue events recorded", publisher.events().len());
    let issues = store.list_issues(Some(&server)).await?;
    print_issues(&issues);
    Ok(())
}

fn print_issues(issues: &[Issue]) {
    println!("🚨 Issues ({})", issues.len());
    println!("═══════════════════════════════════════");
    for issue in issues {
        println!(
            "{:>5.1}  {:<8} {}",
            issue.impact_score,
            issue.severity.as_str().to_uppercase().color(issue.severity.color()).bold(),
            issue.title
        );
        println!(
            "       {} occurrence(s), {} user(s), last seen {}",
            issue.occurrence_count,
            issue.affected_users,
            issue.last_seen.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

/// Parse a whole file's contents, including an unterminated last line and
/// any entry still open at end of input
pub fn parse_bytes(bytes: &[u8], file: &Path, format: LogFormat, server: &str) -> Vec<ParsedLogEntry> {
    let mut ctx = ParseContext::new(server, format).with_file_path(file.to_string_lossy());
    let mut splitter = LineSplitter::new(Encoding::Utf8, 0, 0);

    let mut lines = splitter.push(bytes);
    if splitter.pending_len() > 0 {
        lines.extend(splitter.push(b"\n"));
    }

    let mut entries = Vec::new();
    for line in lines {
        let outcome = parse_line(&line.text, line.position, &mut ctx);
        entries.extend(outcome.completed);
    }
    entries.extend(ctx.flush());
    entries
}
