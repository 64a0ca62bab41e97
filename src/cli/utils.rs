use crate::config::AppConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logging(verbose: bool, log_format: &str) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let fmt_layer = if log_format == "json" {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .expect("Failed to initialize tracing subscriber");
}

pub fn print_info() {
    println!("Logarr v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    println!();
    println!("Authors: {}", env!("CARGO_PKG_AUTHORS"));
    println!("License: {}", env!("CARGO_PKG_LICENSE"));
    println!();
    println!("Default config: {}", AppConfig::default_path().display());
}

/// Load the configuration for a command.
///
/// An explicit path must exist. When none is given and the default file is
/// missing, built-in defaults with no servers are used.
pub fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let default = AppConfig::default_path();
            if default.exists() {
                AppConfig::load(&default)
                    .with_context(|| format!("Failed to load config from {}", default.display()))
            } else {
                warn!("No config at {}, using defaults", default.display());
                let mut config = AppConfig::default();
                config.ingestion.apply_env();
                Ok(config)
            }
        }
    }
}
