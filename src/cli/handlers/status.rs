use crate::cli::utils::load_config;
use crate::tailer::{JsonTailStateStore, TailState, TailStateStore};
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub async fn handle_status_command(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let store = JsonTailStateStore::open(&config.ingestion.resolved_state_dir())?;
    let mut states = store.list().await?;
    states.sort_by(|a, b| {
        a.server_id
            .cmp(&b.server_id)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    println!("📊 Tail Status");
    println!("═══════════════════════════════════════");
    println!("State file: {}", store.file_path().display());

    if states.is_empty() {
        println!("\nNo files have been tailed yet");
        return Ok(());
    }

    let mut current_server = None;
    for state in &states {
        if current_server != Some(state.server_id.as_str()) {
            println!("\n{}", state.server_id.bold());
            current_server = Some(state.server_id.as_str());
        }
        print_state(state);
    }

    Ok(())
}

fn print_state(state: &TailState) {
    let marker = if state.last_error.is_some() {
        "✗".red()
    } else if state.active {
        "●".green()
    } else {
        "○".dimmed()
    };

    println!(
        "  {} {}  offset {}/{}  line {}  gen {}",
        marker,
        state.relative_path,
        state.byte_offset,
        state.file_size,
        state.line_number,
        state.generation
    );
    if let Some(read_at) = state.last_read_at {
        println!("      last read {}", read_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &state.last_error {
        let at = state
            .last_error_at
            .map(|t| t.format(" (%Y-%m-%d %H:%M:%S UTC)").to_string())
            .unwrap_or_default();
        println!("      {}{}", error.red(), at);
    }
}
