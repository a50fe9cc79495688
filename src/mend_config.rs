//! Configuration file support for mend.
//!
//! Settings live in `.mend/mend.toml` (project) and `~/.mend/mend.toml`
//! (global, used when the project has none). Every field is optional.
//! Layering is file → environment → CLI; see [`crate::config::Config`].
//!
//! # Configuration File Format
//!
//! ```toml
//! [test]
//! command = "pytest -q"
//! format = "auto"
//! report_file = "report.json"
//! timeout_secs = 600
//!
//! [model]
//! id = "claude-sonnet-4"
//! backend = "http"
//! max_output_tokens = 8192
//! request_timeout_secs = 120
//! max_retries = 3
//! safety_margin = "95%"
//! scaffold_tokens = 1500
//!
//! [retry]
//! max_attempts = 4
//! chunk_size = 10
//! on_over_budget = "prompt"
//!
//! [compression]
//! stack_window = 5
//! aggressive_stack_window = 2
//! message_max_chars = 600
//! target_reduction = 0.85
//!
//! [models."my-local-model"]
//! input_token_limit = 64000
//! safety_margin = "90%"
//! ```

use crate::compaction::CompressionSettings;
use crate::gates::RecoveryChoice;
use crate::orchestrator::model::DEFAULT_API_URL;
use crate::orchestrator::retry::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_SCAFFOLD_TOKENS};
use crate::parser::OutputFormat;
use crate::tokens::{DEFAULT_SAFETY_MARGIN, ModelLimit, parse_safety_margin};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "mend.toml";
pub const GLOBAL_MEND_DIR: &str = ".mend";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4";

/// Which model collaborator to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelBackend {
    /// Messages API over HTTPS.
    #[default]
    Http,
    /// The `claude` CLI in print mode.
    ClaudeCli,
}

impl std::fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelBackend::Http => write!(f, "http"),
            ModelBackend::ClaudeCli => write!(f, "claude-cli"),
        }
    }
}

impl std::str::FromStr for ModelBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "api" => Ok(ModelBackend::Http),
            "claude-cli" | "claude" | "cli" => Ok(ModelBackend::ClaudeCli),
            _ => anyhow::bail!("Invalid model backend '{}'. Valid values: http, claude-cli", s),
        }
    }
}

/// What to do when a report does not fit the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverBudgetPolicy {
    /// Ask on the terminal.
    #[default]
    Prompt,
    Truncate,
    Chunk,
    Abort,
}

impl OverBudgetPolicy {
    /// The fixed choice, or `None` for interactive.
    pub fn fixed_choice(self) -> Option<RecoveryChoice> {
        match self {
            OverBudgetPolicy::Prompt => None,
            OverBudgetPolicy::Truncate => Some(RecoveryChoice::AggressiveTruncate),
            OverBudgetPolicy::Chunk => Some(RecoveryChoice::ChunkedBatch),
            OverBudgetPolicy::Abort => Some(RecoveryChoice::Abort),
        }
    }
}

impl std::fmt::Display for OverBudgetPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverBudgetPolicy::Prompt => write!(f, "prompt"),
            OverBudgetPolicy::Truncate => write!(f, "truncate"),
            OverBudgetPolicy::Chunk => write!(f, "chunk"),
            OverBudgetPolicy::Abort => write!(f, "abort"),
        }
    }
}

impl std::str::FromStr for OverBudgetPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prompt" | "ask" => Ok(OverBudgetPolicy::Prompt),
            "truncate" => Ok(OverBudgetPolicy::Truncate),
            "chunk" => Ok(OverBudgetPolicy::Chunk),
            "abort" => Ok(OverBudgetPolicy::Abort),
            _ => anyhow::bail!(
                "Invalid over-budget policy '{}'. Valid values: prompt, truncate, chunk, abort",
                s
            ),
        }
    }
}

/// `[test]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSection {
    /// Shell command that runs the test suite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub format: OutputFormat,
    /// JSON report written by the test command, relative to the project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<PathBuf>,
    #[serde(default = "default_test_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_test_timeout_secs() -> u64 {
    600
}

impl Default for TestSection {
    fn default() -> Self {
        Self {
            command: None,
            format: OutputFormat::default(),
            report_file: None,
            timeout_secs: default_test_timeout_secs(),
        }
    }
}

/// `[model]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_model_id")]
    pub id: String,
    #[serde(default)]
    pub backend: ModelBackend,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Command for the `claude-cli` backend
    #[serde(default = "default_claude_cmd")]
    pub claude_cmd: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Share of the input limit a prompt may use, as "95%" or "0.95"
    #[serde(default = "default_safety_margin")]
    pub safety_margin: String,
    /// Estimated token cost of the prompt template
    #[serde(default = "default_scaffold_tokens")]
    pub scaffold_tokens: usize,
}

fn default_model_id() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_claude_cmd() -> String {
    "claude".to_string()
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    crate::orchestrator::model::DEFAULT_MAX_RETRIES
}

fn default_safety_margin() -> String {
    format!("{:.0}%", DEFAULT_SAFETY_MARGIN * 100.0)
}

fn default_scaffold_tokens() -> usize {
    DEFAULT_SCAFFOLD_TOKENS
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            id: default_model_id(),
            backend: ModelBackend::default(),
            api_url: default_api_url(),
            claude_cmd: default_claude_cmd(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            safety_margin: default_safety_margin(),
            scaffold_tokens: default_scaffold_tokens(),
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub on_over_budget: OverBudgetPolicy,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            chunk_size: default_chunk_size(),
            on_over_budget: OverBudgetPolicy::default(),
        }
    }
}

/// `[compression]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSection {
    #[serde(default = "default_stack_window")]
    pub stack_window: usize,
    #[serde(default = "default_aggressive_stack_window")]
    pub aggressive_stack_window: usize,
    #[serde(default = "default_message_max_chars")]
    pub message_max_chars: usize,
    #[serde(default = "default_target_reduction")]
    pub target_reduction: f64,
}

fn default_stack_window() -> usize {
    crate::compaction::DEFAULT_STACK_WINDOW
}

fn default_aggressive_stack_window() -> usize {
    crate::compaction::DEFAULT_AGGRESSIVE_STACK_WINDOW
}

fn default_message_max_chars() -> usize {
    crate::compaction::DEFAULT_MESSAGE_MAX_CHARS
}

fn default_target_reduction() -> f64 {
    crate::compaction::DEFAULT_TARGET_REDUCTION
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            stack_window: default_stack_window(),
            aggressive_stack_window: default_aggressive_stack_window(),
            message_max_chars: default_message_max_chars(),
            target_reduction: default_target_reduction(),
        }
    }
}

impl CompressionSection {
    pub fn to_settings(&self) -> CompressionSettings {
        CompressionSettings {
            stack_window: self.stack_window,
            aggressive_stack_window: self.aggressive_stack_window,
            message_max_chars: self.message_max_chars,
            target_reduction: self.target_reduction,
            allow_lossy: false,
        }
    }
}

/// `[models."<id>"]`: a per-model limit override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLimitOverride {
    pub input_token_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_margin: Option<String>,
}

/// The complete mend.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MendToml {
    #[serde(default)]
    pub test: TestSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub compression: CompressionSection,
    #[serde(default)]
    pub models: BTreeMap<String, ModelLimitOverride>,
}

impl MendToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse mend.toml")
    }

    /// Load `.mend/mend.toml`, falling back to the global file, then defaults.
    pub fn load_or_default(mend_dir: &Path) -> Result<Self> {
        let config_path = mend_dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Self::load(&config_path);
        }
        if let Some(global) = global_config_path()
            && global.exists()
        {
            tracing::debug!(path = %global.display(), "Using global config");
            return Self::load(&global);
        }
        Ok(Self::default())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize mend.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Default safety margin as a fraction. Falls back to the built-in
    /// margin when the configured one does not parse (see [`Self::validate`]).
    pub fn safety_margin(&self) -> f64 {
        parse_safety_margin(&self.model.safety_margin).unwrap_or(DEFAULT_SAFETY_MARGIN)
    }

    /// `[models.*]` entries as registry overrides.
    pub fn limit_overrides(&self) -> Vec<ModelLimit> {
        let default_margin = self.safety_margin();
        self.models
            .iter()
            .map(|(id, o)| {
                let margin = o
                    .safety_margin
                    .as_deref()
                    .and_then(|m| parse_safety_margin(m).ok())
                    .unwrap_or(default_margin);
                ModelLimit::new(id, o.input_token_limit, margin)
            })
            .collect()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.test.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
            warnings.push(
                "No [test] command configured; pass --test-command or set MEND_TEST_COMMAND"
                    .to_string(),
            );
        }
        if self.test.timeout_secs == 0 {
            warnings.push("[test] timeout_secs is 0; every run will time out".to_string());
        }
        if let Err(e) = parse_safety_margin(&self.model.safety_margin) {
            warnings.push(format!("Invalid [model] safety_margin: {}", e));
        }
        if self.model.max_output_tokens == 0 {
            warnings.push("[model] max_output_tokens must be greater than 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            warnings.push("[retry] max_attempts is 0; one attempt will still run".to_string());
        }
        if self.retry.chunk_size == 0 {
            warnings.push("[retry] chunk_size is 0; batches of 1 will be used".to_string());
        }
        if !(0.0..1.0).contains(&self.compression.target_reduction) {
            warnings.push(format!(
                "[compression] target_reduction {} should be in [0, 1)",
                self.compression.target_reduction
            ));
        }
        if self.compression.aggressive_stack_window > self.compression.stack_window {
            warnings.push(format!(
                "[compression] aggressive_stack_window ({}) is larger than stack_window ({})",
                self.compression.aggressive_stack_window, self.compression.stack_window
            ));
        }
        for (id, o) in &self.models {
            if o.input_token_limit == 0 {
                warnings.push(format!("[models.\"{}\"] input_token_limit must be > 0", id));
            }
            if let Some(margin) = &o.safety_margin
                && let Err(e) = parse_safety_margin(margin)
            {
                warnings.push(format!("Invalid safety_margin for model '{}': {}", id, e));
            }
        }

        warnings
    }
}

/// `~/.mend/mend.toml`, when a home directory is known.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_MEND_DIR).join(CONFIG_FILE))
}
