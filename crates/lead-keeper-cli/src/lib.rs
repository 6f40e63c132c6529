//! # Lead-Keeper CLI
//!
//! Command-line interface for operating a Lead-Keeper service.
//!
//! This module provides CLI commands for:
//! - Inspecting and replaying webhook receipts
//! - Reading the failure ledger
//! - Moving deals through their lifecycle
//! - Reading a contact timeline
//! - Validating and showing service configuration

pub mod client;
pub mod output;

use crate::client::{ApiClient, TimelineOptions};
use clap::{CommandFactory, Parser, Subcommand};
use lead_keeper_api::config::ServiceConfig;
use lead_keeper_api::errors::ConfigError;
use std::path::PathBuf;
use tracing::info;

/// Default service address
pub const DEFAULT_URL: &str = "http://localhost:8080";

// ============================================================================
// CLI Structure
// ============================================================================

/// Lead-Keeper CLI - Operate lead ingestion and deals
#[derive(Debug, Parser)]
#[command(name = "lead-keeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate a Lead-Keeper CRM service")]
pub struct Cli {
    /// Base URL of the Lead-Keeper service
    #[arg(long, global = true, env = "LEAD_KEEPER_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Bearer token for the admin and CRM endpoints
    #[arg(long, global = true, env = "LEAD_KEEPER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Logging level
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Webhook receipt commands
    Receipts {
        #[command(subcommand)]
        action: ReceiptCommands,
    },

    /// Failure ledger commands
    Failures {
        #[command(subcommand)]
        action: FailureCommands,
    },

    /// Deal lifecycle commands
    Deals {
        #[command(subcommand)]
        action: DealCommands,
    },

    /// Show the activity timeline of a contact
    Timeline {
        /// Contact ID
        contact_id: String,

        /// Comma-separated entry types (deal, task, email, system)
        #[arg(short, long)]
        types: Option<String>,

        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        from: Option<String>,

        /// Only entries at or before this RFC 3339 timestamp
        #[arg(long)]
        to: Option<String>,

        /// Continue from a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Page size
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Check service health
    Health,

    /// Service configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Output format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Receipt subcommands
#[derive(Debug, Subcommand)]
pub enum ReceiptCommands {
    /// List receipts, newest first
    List {
        /// Filter by status (pending, processing, processed, failed)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one receipt including its payload
    Show { receipt_id: String },

    /// Reset a receipt's retries and queue it again
    Replay { receipt_id: String },
}

/// Failure ledger subcommands
#[derive(Debug, Subcommand)]
pub enum FailureCommands {
    /// List failure records
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one failure record
    Show { failure_id: String },
}

/// Deal subcommands
#[derive(Debug, Subcommand)]
pub enum DealCommands {
    /// Move a deal to another stage
    Stage {
        deal_id: String,

        #[arg(value_parser = ["new", "qualified", "proposal", "negotiation"])]
        stage: String,

        /// Win probability in percent
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        probability: Option<u8>,
    },

    /// Mark a deal as won
    Won {
        deal_id: String,

        /// Won amount in minor units; defaults to the deal amount
        #[arg(short, long)]
        amount: Option<u64>,
    },

    /// Mark a deal as lost
    Lost {
        deal_id: String,

        /// Why the deal was lost (at least 5 characters)
        #[arg(short, long)]
        reason: String,
    },
}

/// Configuration subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Load and validate the service configuration
    Validate {
        /// Configuration file; defaults to the service's search path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show the resolved configuration with secrets redacted
    Show {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {message}")]
    Output { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 3,
            Self::Request(_) => 4,
            Self::Api { .. } => 5,
            Self::InvalidArgument { .. } => 2,
            Self::Output { .. } => 1,
        }
    }
}

// ============================================================================
// Command Execution
// ============================================================================

/// Execute a parsed command line and return the text to print
pub async fn run(cli: Cli) -> Result<String, CliError> {
    let format = cli.format.clone();

    match cli.command {
        Commands::Config { action } => execute_config_command(action, &format),
        Commands::Completions { shell } => execute_completions_command(shell),
        command => {
            let client = ApiClient::new(&cli.url, cli.token)?;
            let value = execute_remote_command(&client, command).await?;
            output::render(&value, &format)
        }
    }
}

async fn execute_remote_command(
    client: &ApiClient,
    command: Commands,
) -> Result<serde_json::Value, CliError> {
    match command {
        Commands::Receipts { action } => match action {
            ReceiptCommands::List { status, limit } => {
                client.list_receipts(status.as_deref(), limit).await
            }
            ReceiptCommands::Show { receipt_id } => client.get_receipt(&receipt_id).await,
            ReceiptCommands::Replay { receipt_id } => {
                info!(receipt_id = %receipt_id, "Replaying receipt");
                client.replay_receipt(&receipt_id).await
            }
        },
        Commands::Failures { action } => match action {
            FailureCommands::List { limit } => client.list_failures(limit).await,
            FailureCommands::Show { failure_id } => client.get_failure(&failure_id).await,
        },
        Commands::Deals { action } => match action {
            DealCommands::Stage {
                deal_id,
                stage,
                probability,
            } => client.change_stage(&deal_id, &stage, probability).await,
            DealCommands::Won { deal_id, amount } => client.mark_won(&deal_id, amount).await,
            DealCommands::Lost { deal_id, reason } => client.mark_lost(&deal_id, &reason).await,
        },
        Commands::Timeline {
            contact_id,
            types,
            from,
            to,
            cursor,
            limit,
        } => {
            let options = TimelineOptions {
                types,
                from,
                to,
                cursor,
                limit,
            };
            client.timeline(&contact_id, &options).await
        }
        Commands::Health => client.health().await,
        Commands::Config { .. } | Commands::Completions { .. } => Err(CliError::InvalidArgument {
            arg: "command".to_string(),
            message: "not a remote command".to_string(),
        }),
    }
}

fn execute_config_command(
    action: ConfigCommands,
    format: &OutputFormat,
) -> Result<String, CliError> {
    match action {
        ConfigCommands::Validate { file } => {
            let path = file.or_else(ServiceConfig::explicit_path_from_env);
            let config = ServiceConfig::load(path.as_deref())?;
            config.validate()?;
            Ok(format!(
                "Configuration is valid (listening on {}:{}, {} worker(s))",
                config.server.host, config.server.port, config.pipeline.workers
            ))
        }
        ConfigCommands::Show { file } => {
            let path = file.or_else(ServiceConfig::explicit_path_from_env);
            let config = ServiceConfig::load(path.as_deref())?;
            let format = match format {
                OutputFormat::Text => &OutputFormat::Yaml,
                other => other,
            };
            output::render(&config.redacted(), format)
        }
    }
}

fn execute_completions_command(shell: clap_complete::Shell) -> Result<String, CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();
    clap_complete::generate(shell, &mut command, "lead-keeper", &mut buffer);
    String::from_utf8(buffer).map_err(|e| CliError::Output {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
