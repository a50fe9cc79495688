use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mend::mend_config::{ModelBackend, OverBudgetPolicy};
use mend::parser::OutputFormat;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "mend")]
#[command(version, about = "Compress failing test output and let a model repair it")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize .mend/ with a default mend.toml
    Init {
        /// Test command to store in mend.toml
        #[arg(long)]
        test_command: Option<String>,
    },
    /// Run the tests and repair failures until they pass or attempts run out
    Run {
        /// Model id (overrides mend.toml and MEND_MODEL)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum attempts (overrides mend.toml and MEND_MAX_ATTEMPTS)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Test command (overrides mend.toml and MEND_TEST_COMMAND)
        #[arg(long)]
        test_command: Option<String>,

        /// Expected output format: auto, jest-json, pytest-json, json, console
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Over-budget policy: prompt, truncate, chunk, abort
        #[arg(long)]
        on_over_budget: Option<OverBudgetPolicy>,

        /// Model backend: http, claude-cli
        #[arg(long)]
        backend: Option<ModelBackend>,

        /// Call the model once but do not write any files
        #[arg(long)]
        dry_run: bool,
    },
    /// Parse test output and list the failures found
    Parse {
        /// File with test output (stdin if not provided)
        file: Option<PathBuf>,

        #[arg(long, default_value = "auto")]
        format: OutputFormat,

        /// Print the parsed report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compress test output to a token budget and print the result
    Compress {
        /// File with test output (stdin if not provided)
        file: Option<PathBuf>,

        #[arg(long, default_value = "auto")]
        format: OutputFormat,

        /// Token budget for the report (defaults to the configured target reduction)
        #[arg(short, long)]
        budget: Option<usize>,

        /// Use the model's report budget instead of --budget
        #[arg(short, long)]
        model: Option<String>,

        /// Use the lossy profile
        #[arg(long)]
        aggressive: bool,

        /// Print the compressed report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show model input limits
    Limits {
        /// Resolve a single model id
        model: Option<String>,
    },
    /// Inspect attempt history
    Audit {
        #[command(subcommand)]
        command: Option<AuditCommands>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AuditCommands {
    /// List recorded runs, newest first
    List,
    /// Show one run (the latest if no id is given)
    Show {
        /// Run id or a prefix of it
        run: Option<String>,
        /// Print the raw run as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir.join(mend::init::MEND_DIR).join("logs");
    let log_guard = mend::logging::init(cli.verbose, Some(&log_dir));

    match &cli.command {
        Commands::Init { test_command } => cmd::cmd_init(&project_dir, test_command.as_deref())?,
        Commands::Run {
            model,
            max_attempts,
            test_command,
            format,
            on_over_budget,
            backend,
            dry_run,
        } => {
            let overrides = mend::config::CliOverrides {
                model: model.clone(),
                max_attempts: *max_attempts,
                test_command: test_command.clone(),
                format: *format,
                on_over_budget: *on_over_budget,
                backend: *backend,
                dry_run: *dry_run,
            };
            let code = cmd::cmd_run(&cli, project_dir, overrides).await?;
            if code != 0 {
                drop(log_guard);
                std::process::exit(code);
            }
        }
        Commands::Parse { file, format, json } => {
            cmd::cmd_parse(file.as_deref(), *format, *json)?
        }
        Commands::Compress {
            file,
            format,
            budget,
            model,
            aggressive,
            json,
        } => cmd::cmd_compress(
            &project_dir,
            file.as_deref(),
            cmd::CompressArgs {
                format: *format,
                budget: *budget,
                model: model.clone(),
                aggressive: *aggressive,
                json: *json,
            },
        )?,
        Commands::Limits { model } => cmd::cmd_limits(&project_dir, model.as_deref())?,
        Commands::Audit { command } => cmd::cmd_audit(&project_dir, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    drop(log_guard);
    Ok(())
}
