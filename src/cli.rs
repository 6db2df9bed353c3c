//! Command-line interface parsing for flowcache
//!
//! This module handles parsing of CLI arguments using clap, including the
//! `--where FIELD=VALUE` filter accepted by `get`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::data::FieldFilter;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The `--where` argument is not `FIELD=VALUE`
    #[error("Invalid filter: '{0}'. Expected FIELD=VALUE, e.g. band=66594971465c86eb74b1d8a0")]
    InvalidFilter(String),
}

/// flowcache - Local cache of Webflow CMS collections
#[derive(Parser, Debug)]
#[command(name = "flowcache")]
#[command(about = "Keep a local, always-readable cache of Webflow CMS collections")]
#[command(version)]
pub struct Cli {
    /// TOML config file (overrides WEBFLOW_CONFIG_FILE)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides the configured one)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Refresh one collection, or every configured collection
    Refresh {
        /// Collection name; all collections when omitted
        collection: Option<String>,
        /// Refresh even if the cached copy is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Print cached items as JSON lines
    ///
    /// Examples:
    ///   flowcache get bands
    ///   flowcache get albums --where band=66594971465c86eb74b1d8a0
    ///   flowcache get songs --count
    Get {
        collection: String,
        /// Only items whose field equals the value
        #[arg(long = "where", value_name = "FIELD=VALUE", value_parser = parse_filter_arg)]
        filter: Option<FieldFilter>,
        /// Print the number of matching items instead
        #[arg(long)]
        count: bool,
    },
    /// Delete cached data for one collection, or all of them
    Clear { collection: Option<String> },
    /// Show state, item count and age of each collection
    Status,
    /// Check that the API token can reach the configured site
    Ping,
    /// Run the background refresh worker until Ctrl-C
    Watch,
}

/// Parses a `--where` argument into a field filter.
///
/// Splits on the first `=`, so values may themselves contain `=`.
///
/// # Returns
/// * `Ok(FieldFilter)` for `FIELD=VALUE` with a non-empty field
/// * `Err(CliError::InvalidFilter)` otherwise
pub fn parse_filter_arg(s: &str) -> Result<FieldFilter, CliError> {
    match s.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok(FieldFilter::new(field.trim(), value))
        }
        _ => Err(CliError::InvalidFilter(s.to_string())),
    }
}
