use crate::cli::utils::load_config;
use crate::discovery::discover_targets;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

pub async fn handle_discover_command(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let max_age = config.ingestion.max_file_age_days;

    println!("🔍 Log Discovery");
    println!("═══════════════════════════════════════");

    let mut total = 0;
    for server in &config.servers {
        if !server.enabled {
            println!("\n{} {} ({})", "○".dimmed(), server.id, "disabled".dimmed());
            continue;
        }

        let id = server.id.clone();
        let roots = server.resolved_paths();
        let server = server.clone();
        let targets = tokio::task::spawn_blocking(move || discover_targets(&server, max_age)).await?;

        println!("\n{} {} [{}]", "●".green(), id, roots.join(", "));
        if targets.is_empty() {
            println!("  {}", "no tailable files".yellow());
        }
        for target in &targets {
            println!("  • {} {}", target.relative_path, format!("({})", target.path.display()).dimmed());
        }
        total += targets.len();
    }

    info!("Discovered {} tailable files", total);
    Ok(())
}
