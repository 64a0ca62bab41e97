use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::discovery::validate::DEFAULT_LISTING_LIMIT;

#[derive(Parser, Debug)]
#[command(
    name = "logarr",
    about = "Log ingestion and issue correlation for media servers and *arr apps",
    version,
    author
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format for logs (text or json)
    #[arg(long, default_value = "text", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tail every configured server's logs until interrupted
    Run {
        /// Configuration file (defaults to <config dir>/logarr/config.yaml)
        #[arg(short, long, env = "LOGARR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List the log files that would be tailed
    Discover {
        /// Configuration file (defaults to <config dir>/logarr/config.yaml)
        #[arg(short, long, env = "LOGARR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Check that a log path exists and is readable
    ValidatePath {
        /// Path to check; `~` and environment variables are expanded
        path: String,

        /// Maximum number of directory entries to list
        #[arg(short, long, default_value_t = DEFAULT_LISTING_LIMIT)]
        limit: usize,
    },

    /// Parse a log file once and print its entries as JSON
    Parse {
        /// Log file to parse
        file: PathBuf,

        /// Line grammar of the file
        #[arg(short, long, value_enum, default_value = "pipe")]
        format: FormatArg,

        /// Server id stamped on each entry
        #[arg(short, long, default_value = "local")]
        server: String,

        /// Correlate error entries and print an issue summary instead
        #[arg(long)]
        issues: bool,
    },

    /// Show persisted tail checkpoints
    Status {
        /// Configuration file (defaults to <config dir>/logarr/config.yaml)
        #[arg(short, long, env = "LOGARR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Show information about Logarr
    Info,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Pipe,
    Jellyfin,
    Plex,
}

impl From<FormatArg> for crate::parser::LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pipe => crate::parser::LogFormat::Pipe,
            FormatArg::Jellyfin => crate::parser::LogFormat::Jellyfin,
            FormatArg::Plex => crate::parser::LogFormat::Plex,
        }
    }
}
