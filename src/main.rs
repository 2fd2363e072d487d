use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use workbench::config::{OrchestrationMode, WorkbenchConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "workbench")]
#[command(version, about = "Data-driven phase execution for software-delivery pipelines")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Orchestration mode: legacy or data-driven. Overrides workbench.toml and DATA_DRIVEN_ORCHESTRATION.
    #[arg(long, global = true)]
    pub mode: Option<OrchestrationMode>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize .workbench/, the database and the default phase chain
    Init,
    /// Start a pipeline for an epic
    Start {
        #[arg(long)]
        epic_id: String,

        /// Epic description handed to every phase prompt
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Advance a pipeline by one phase
    Advance { pipeline_id: String },
    /// Show a pipeline's phase, artifacts and transition history
    Status {
        pipeline_id: String,

        #[arg(long)]
        json: bool,
    },
    /// Inspect or edit phase configurations
    Phases {
        #[command(subcommand)]
        command: PhasesCommands,
    },
    /// Manage role prompts
    Prompts {
        #[command(subcommand)]
        command: PromptsCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PhasesCommands {
    /// List all phase configurations
    List,
    /// Create or replace a phase configuration
    Set {
        name: String,

        #[arg(long)]
        role: String,

        #[arg(long)]
        artifact_type: String,

        /// Successor phase; omit for a terminal phase
        #[arg(long)]
        next: Option<String>,

        #[arg(long)]
        inactive: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum PromptsCommands {
    /// Add a prompt version for a role and make it active
    Add {
        role: String,

        #[arg(long)]
        bootstrap: PathBuf,

        #[arg(long)]
        instructions: PathBuf,

        #[arg(long, default_value = "1")]
        version: String,

        /// Store without activating
        #[arg(long)]
        inactive: bool,
    },
    /// List all stored prompts
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default workbench.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = WorkbenchConfig::with_cli_args(project_dir, cli.verbose, cli.mode)?;
    let _log_guard = workbench::logging::init(&config)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Start {
            epic_id,
            description,
        } => cmd::cmd_start(&config, epic_id, description.as_deref()).await?,
        Commands::Advance { pipeline_id } => cmd::cmd_advance(&config, pipeline_id).await?,
        Commands::Status { pipeline_id, json } => {
            cmd::cmd_status(&config, pipeline_id, *json).await?
        }
        Commands::Phases { command } => cmd::cmd_phases(&config, command.clone())?,
        Commands::Prompts { command } => cmd::cmd_prompts(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
