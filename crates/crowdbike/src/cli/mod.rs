//! Command-line interface for crowdbike.
//!
//! This module provides the CLI structure for the `crowdbike` binary; the
//! handlers live in `main.rs`.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ExportCommand, GpsCommand, ReadCommand, RecordCommand, StatusCommand,
    VapourCommand,
};

/// crowdbike - Bike-mounted temperature and humidity logger
///
/// Samples a DHT22 (and optionally an SDS011) together with a GPS fix at a
/// fixed rate and writes one record per sample to a CSV log and a local
/// database.
#[derive(Debug, Parser)]
#[command(name = "crowdbike")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the logger until interrupted
    Record(RecordCommand),

    /// Take one temperature and humidity reading
    Read(ReadCommand),

    /// Compute vapour pressure from temperature and humidity
    Vapour(VapourCommand),

    /// Wait for a GPS fix and print it
    Gps(GpsCommand),

    /// Show stored sessions and database statistics
    Status(StatusCommand),

    /// Export a recorded session as CSV
    Export(ExportCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Check the hardware and system setup
    Doctor,
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
