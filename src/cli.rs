//! CLI definitions for echobeats.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Echobeats CLI.
#[derive(Parser)]
#[command(name = "echobeats")]
#[command(about = "Persistent scheduler for echobeats cognitive beats")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/echobeats.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in the foreground until Ctrl-C
    Run {
        /// Job store directory (overrides the config file)
        #[arg(long, env = "ECHOBEATS_STORE")]
        store: Option<PathBuf>,
    },

    /// List persisted jobs
    Jobs {
        /// Job store directory (overrides the config file)
        #[arg(long, env = "ECHOBEATS_STORE")]
        store: Option<PathBuf>,
    },
}
