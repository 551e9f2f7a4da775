//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute an instruction set read as JSON from stdin
    Execute {
        /// Directory holding the task's scripts
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,

        /// Free-form description logged with the task
        #[arg(long, value_name = "TEXT")]
        note: Option<String>,
    },

    /// Print the live counters of a running executor
    Stats {
        /// Stats address of the executor (host:port)
        #[arg(long, value_name = "ADDRESS")]
        address: String,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Print a sample configuration with every default
    Sample,
}
