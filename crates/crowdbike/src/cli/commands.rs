//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Record command arguments.
#[derive(Debug, Args)]
pub struct RecordCommand {
    /// Stop after this many sampling ticks
    #[arg(short = 'n', long, value_name = "N")]
    pub samples: Option<u64>,

    /// Do not write the CSV log
    #[arg(long)]
    pub no_csv: bool,

    /// Do not write to the database
    #[arg(long)]
    pub no_db: bool,
}

/// Read command arguments.
#[derive(Debug, Args)]
pub struct ReadCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Vapour pressure command arguments.
#[derive(Debug, Args)]
pub struct VapourCommand {
    /// Air temperature in °C
    #[arg(short, long, allow_negative_numbers = true)]
    pub temperature: f64,

    /// Relative humidity in %
    #[arg(short = 'r', long)]
    pub humidity: f64,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// GPS command arguments.
#[derive(Debug, Args)]
pub struct GpsCommand {
    /// Give up after this many seconds without a fix
    #[arg(short, long, default_value = "60", value_name = "SECS")]
    pub timeout: u64,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Number of recent sessions to list
    #[arg(short, long, default_value = "5")]
    pub limit: usize,
}

/// Export command arguments.
#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Session to export (defaults to the latest)
    #[arg(short, long, value_name = "ID")]
    pub session: Option<i64>,

    /// Write to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration file
    Validate {
        /// Path to config file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
