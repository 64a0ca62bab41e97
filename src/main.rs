use anyhow::Result;
use clap::Parser;
use logarr::cli::commands::{Cli, Commands};
use logarr::cli::handlers::{
    handle_discover_command, handle_parse_command, handle_run_command, handle_status_command,
    handle_validate_path_command,
};
use logarr::cli::utils::{init_logging, print_info};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, &cli.log_format);

    // Execute command
    match cli.command {
        Commands::Run { config } => handle_run_command(config).await,

        Commands::Discover { config } => handle_discover_command(config).await,

        Commands::ValidatePath { path, limit } => handle_validate_path_command(path, limit),

        Commands::Parse {
            file,
            format,
            server,
            issues,
        } => handle_parse_command(file, format.into(), server, issues).await,

        Commands::Status { config } => handle_status_command(config).await,

        Commands::Info => {
            print_info();
            Ok(())
        }
    }
}
