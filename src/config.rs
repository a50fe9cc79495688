use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::init::MEND_DIR;
use crate::mend_config::{ModelBackend, MendToml, OverBudgetPolicy};
use crate::orchestrator::RetryConfig;
use crate::parser::OutputFormat;
use crate::tokens::{ModelLimit, ModelLimitRegistry};

/// Command-line values that take precedence over the environment and
/// `mend.toml`. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub max_attempts: Option<u32>,
    pub test_command: Option<String>,
    pub format: Option<OutputFormat>,
    pub on_over_budget: Option<OverBudgetPolicy>,
    pub backend: Option<ModelBackend>,
    pub dry_run: bool,
}

/// Runtime configuration for mend.
///
/// Resolves `mend.toml`, the environment, and CLI flags into the values a run
/// actually uses, and knows where everything lives under `.mend/`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub mend_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub dry_run: bool,
    pub model_id: String,
    pub backend: ModelBackend,
    pub test_command: Option<String>,
    pub max_attempts: u32,
    pub format: OutputFormat,
    pub on_over_budget: OverBudgetPolicy,
    pub api_key: Option<String>,
    /// The file settings after environment and CLI values are applied.
    pub toml: MendToml,
}

impl Config {
    /// Load configuration for `project_dir`, reading `.env` and the process
    /// environment.
    pub fn load(project_dir: PathBuf, verbose: bool, cli: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        // A missing .env is normal; variables already set win over it.
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let toml = MendToml::load_or_default(&project_dir.join(MEND_DIR))?;
        Self::resolve(project_dir, verbose, toml, |key| std::env::var(key).ok(), cli)
    }

    /// Layer `env` and `cli` over `toml`. `project_dir` must already be absolute.
    pub fn resolve(
        project_dir: PathBuf,
        verbose: bool,
        mut toml: MendToml,
        env: impl Fn(&str) -> Option<String>,
        cli: CliOverrides,
    ) -> Result<Self> {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("MEND_MODEL") {
            toml.model.id = model;
        }
        if let Some(attempts) = non_empty("MEND_MAX_ATTEMPTS") {
            toml.retry.max_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("Invalid MEND_MAX_ATTEMPTS: {}", attempts))?;
        }
        if let Some(command) = non_empty("MEND_TEST_COMMAND") {
            toml.test.command = Some(command);
        }
        if let Some(claude_cmd) = non_empty("CLAUDE_CMD") {
            toml.model.claude_cmd = claude_cmd;
        }
        let api_key = non_empty("ANTHROPIC_API_KEY");

        if let Some(model) = cli.model {
            toml.model.id = model;
        }
        if let Some(attempts) = cli.max_attempts {
            toml.retry.max_attempts = attempts;
        }
        if let Some(command) = cli.test_command {
            toml.test.command = Some(command);
        }
        if let Some(format) = cli.format {
            toml.test.format = format;
        }
        if let Some(policy) = cli.on_over_budget {
            toml.retry.on_over_budget = policy;
        }
        if let Some(backend) = cli.backend {
            toml.model.backend = backend;
        }

        let mend_dir = project_dir.join(MEND_DIR);
        Ok(Self {
            audit_dir: mend_dir.join("audit"),
            log_dir: mend_dir.join("logs"),
            mend_dir,
            project_dir,
            verbose,
            dry_run: cli.dry_run,
            model_id: toml.model.id.clone(),
            backend: toml.model.backend,
            test_command: toml
                .test
                .command
                .clone()
                .filter(|c| !c.trim().is_empty()),
            max_attempts: toml.retry.max_attempts,
            format: toml.test.format,
            on_over_budget: toml.retry.on_over_budget,
            api_key,
            toml,
        })
    }

    pub fn lock_file(&self) -> PathBuf {
        self.mend_dir.join("run.lock")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.audit_dir.join("runs"))
            .context("Failed to create audit directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn registry(&self) -> ModelLimitRegistry {
        ModelLimitRegistry::new(self.toml.safety_margin()).with_overrides(self.toml.limit_overrides())
    }

    pub fn model_limit(&self) -> ModelLimit {
        self.registry().limit_for(&self.model_id)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.test.timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.model.request_timeout_secs)
    }

    pub fn require_test_command(&self) -> Result<&str> {
        self.test_command.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No test command configured. Set [test] command in .mend/mend.toml, \
                 MEND_TEST_COMMAND, or pass --test-command"
            )
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "ANTHROPIC_API_KEY is not set. Export it, add it to .env, \
                 or use --backend claude-cli"
            )
        })
    }

    /// Settings for the repair loop.
    pub fn retry_config(&self) -> Result<RetryConfig> {
        Ok(RetryConfig {
            model_id: self.model_id.clone(),
            test_command: self.require_test_command()?.to_string(),
            project_dir: self.project_dir.clone(),
            max_attempts: self.max_attempts,
            chunk_size: self.toml.retry.chunk_size,
            format: self.format,
            compression: self.toml.compression.to_settings(),
            scaffold_tokens: self.toml.model.scaffold_tokens,
            stop_after_first: self.dry_run,
        })
    }
}
