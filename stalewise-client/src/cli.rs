//! Command line definition for the `stalewise` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CONFIG_ENV_VAR;

#[derive(Debug, Parser)]
#[command(name = "stalewise")]
#[command(about = "Read and watch a stalewise API through its cache", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the value behind an API path
    Get {
        /// API path, e.g. /api/v1/apps
        #[arg(value_parser = parse_api_path)]
        path: String,
    },
    /// Poll an API path and print every change until interrupted
    Watch {
        /// API path, query string included
        #[arg(value_parser = parse_api_path)]
        path: String,
    },
    /// Print the server version and domain
    Health,
}

/// Trim a path and give it a leading `/`.
fn parse_api_path(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("path must not be empty".to_string());
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}
