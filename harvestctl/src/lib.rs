use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;

pub mod commands;

use commands::config::ConfigSummary;
use commands::discover::DiscoverArgs;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] harvest_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] harvest_core::BrowserError),
    #[error("export error: {0}")]
    Export(#[from] harvest_core::ExportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("discovery aborted with {kept} records kept: {reason}")]
    Aborted { kept: usize, reason: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Incremental product discovery for listing pages", long_about = None)]
pub struct Cli {
    /// Path to harvest.toml
    #[arg(long, default_value = "configs/harvest.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover products on a listing page or across its categories
    Discover(DiscoverArgs),
    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Load and validate the configuration file
    Check,
}

pub fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Discover(args) => {
            let config = harvest_core::load_harvest_config(&cli.config)?;
            let report = commands::discover::run(&config, args)?;
            render(&report, cli.format)?;
            if let Some(reason) = report.aborted {
                return Err(AppError::Aborted {
                    kept: report.kept,
                    reason,
                });
            }
        }
        Commands::Config(ConfigCommands::Check) => {
            let config = harvest_core::load_harvest_config(&cli.config)?;
            let summary = ConfigSummary::new(&cli.config, &config);
            render(&summary, cli.format)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "harvestctl", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}
