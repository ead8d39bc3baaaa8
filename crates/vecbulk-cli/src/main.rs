//! vecbulk CLI - bulk writer for vector database collections.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vecbulk_core::config::LogFormat;
use vecbulk_core::{Config, Error};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Schema declaration error
    SchemaError = 2,
    /// One or more input rows were rejected
    ValidationError = 3,
    /// Upload error (stage apply, quota, object storage)
    UploadError = 4,
    /// Chunk flush or commit error
    FlushError = 5,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<Error>() {
            return match core {
                Error::Config(_) | Error::Serialization(_) => ExitCode::ConfigError,
                Error::Schema(_) => ExitCode::SchemaError,
                Error::Validation(_) => ExitCode::ValidationError,
                Error::Upload(_) => ExitCode::UploadError,
                Error::Flush(_) => ExitCode::FlushError,
                Error::Io(_) | Error::Closed => ExitCode::RuntimeError,
            };
        }
        if error.downcast_ref::<commands::write::RejectedRows>().is_some() {
            return ExitCode::ValidationError;
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("upload") || error_str.contains("stage") {
            ExitCode::UploadError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "vecbulk")]
#[command(about = "Schema-validated bulk writer for vector database collections", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate rows from a JSON Lines file and write them as chunk files
    Write {
        /// Input file, one JSON object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Override the local chunk directory
        #[arg(long)]
        local_path: Option<PathBuf>,

        /// Override the chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Write locally even if a [remote] section is configured
        #[arg(long)]
        local: bool,

        /// Print Prometheus metrics when done
        #[arg(long)]
        metrics: bool,
    },

    /// Upload an existing directory of files to the configured stage
    Upload {
        /// Directory to upload; keys are paths relative to it
        #[arg(short, long)]
        dir: PathBuf,

        /// Override the remote path within the stage
        #[arg(long)]
        remote_path: Option<String>,
    },

    /// Validate configuration file and schema
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log format comes from the config file when it parses; text otherwise.
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or(LogFormat::Text);
    let default_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_str())
        .unwrap_or("info");

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(default_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Write {
            input,
            local_path,
            chunk_size,
            local,
            metrics,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(path) = local_path {
                config.writer.local_path = path;
            }
            if let Some(size) = chunk_size {
                config.writer.chunk_size_bytes = size;
            }
            if local {
                config.remote = None;
            }
            config.validate()?;
            commands::write::run(config, input, metrics).await?;
        }

        Commands::Upload { dir, remote_path } => {
            let config = load_config(&cli.config)?;
            commands::upload::run(config, dir, remote_path).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            commands::validate::run(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("vecbulk.toml"));
    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content).map_err(Error::from)?;
    Ok(config)
}
