// ── CLI definition ──

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Calcifer: digital-twin controller for networked actuators and sensors.
#[derive(Debug, Parser)]
#[command(name = "calcifer", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the configuration file (defaults to the platform config dir).
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller daemon until interrupted.
    Run,

    /// Load and validate the configuration, then exit.
    CheckConfig,
}
