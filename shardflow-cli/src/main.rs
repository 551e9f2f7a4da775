use anyhow::{Context, Result};
use clap::Parser;
use shardflow_config::{ConfigLoader, LogLevel, ShardflowConfig};
use shardflow_core::InstructionSet;
use shardflow_execution::{query_stats, Executor, ExecutorOptions, FunctionRegistry};
use shardflow_logging::{init_logging_from_config, init_simple_tracing};
use shardflow_resilience::interrupt_token;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

mod cli;

use cli::{Cli, Commands, ConfigCommands};

/// Initialize logging from configuration with fallback to simple tracing
fn init_logging_with_config(config: &ShardflowConfig, log_level: Option<&String>) -> Result<()> {
    let mut logging_config = config.logging.clone();
    if let Some(level_str) = log_level {
        match level_str.parse::<LogLevel>() {
            Ok(level) => logging_config.level = level,
            Err(e) => eprintln!("{}, keeping {}", e, logging_config.level.as_str()),
        }
    }

    match init_logging_from_config(&logging_config) {
        Ok(()) => {
            debug!("Structured logging initialized");
        }
        Err(e) => {
            eprintln!(
                "Failed to initialize structured logging: {}, falling back to simple tracing",
                e
            );
            init_simple_tracing(logging_config.level.as_str())?;
        }
    }
    Ok(())
}

fn load_config(config_path: Option<&Path>) -> Result<ShardflowConfig> {
    ConfigLoader::new()
        .load(config_path)
        .context("Failed to load configuration")
}

async fn handle_execute(
    mut config: ShardflowConfig,
    dir: Option<PathBuf>,
    note: Option<String>,
) -> Result<()> {
    if let Some(dir) = dir {
        config.execution.work_dir = dir;
    }

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read instruction set from stdin")?;
    let set: InstructionSet =
        serde_json::from_str(&input).context("Failed to parse instruction set")?;

    info!(
        note = note.as_deref().unwrap_or(""),
        work_dir = %config.execution.work_dir.display(),
        "Starting task with {} instructions",
        set.len()
    );

    let executor = Executor::new(
        ExecutorOptions::from_config(&config),
        FunctionRegistry::with_builtins(),
    );
    let stats = executor
        .execute_instruction_set(&set, interrupt_token())
        .await
        .with_context(|| format!("Task {} failed", set.flow_hash_code))?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn handle_stats(address: &str) -> Result<()> {
    let (flow_hash_code, stats) = query_stats(address)
        .await
        .with_context(|| format!("Failed to query stats from {}", address))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "flow_hash_code": flow_hash_code,
            "stats": stats,
        }))?
    );
    Ok(())
}

fn handle_config_validate(config_file: &Path) -> Result<()> {
    let config = ConfigLoader::new()
        .from_file(config_file)
        .with_context(|| format!("Invalid configuration in {}", config_file.display()))?;
    config.validate_all()?;
    println!("Configuration {} is valid", config_file.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging_with_config(&config, cli.log_level.as_ref())?;

    match cli.command {
        Some(Commands::Execute { dir, note }) => handle_execute(config, dir, note).await,
        Some(Commands::Stats { address }) => handle_stats(&address).await,
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(&config_file),
            ConfigCommands::Sample => {
                print!("{}", ShardflowConfig::generate_sample());
                Ok(())
            }
        },
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
