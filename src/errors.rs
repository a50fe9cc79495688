//! Typed error hierarchy for mend.
//!
//! Four enums cover the pipeline:
//! - `ParseError`: a single parser variant rejected the input (always absorbed)
//! - `TokenBudgetExceeded`: the preflight gate refused a prompt
//! - `ModelError`: the model collaborator failed
//! - `RunError`: conditions that end a repair run early

use thiserror::Error;

/// Why one parser variant could not handle the raw output.
///
/// These never escape `OutputParser::parse`; the fallback chain moves on to
/// the next variant and ultimately to the console parser.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No JSON document found in output")]
    NoJson,

    #[error("JSON fragment is embedded in console output")]
    EmbeddedJson,

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("JSON does not match the {format} schema: {reason}")]
    SchemaMismatch { format: &'static str, reason: String },

    #[error("No recognizable test records")]
    NoRecords,
}

/// The compressed prompt does not fit the model's safe input limit.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error(
    "Prompt needs ~{actual} tokens but {model_id} accepts at most {limit} \
     (after safety margin)"
)]
pub struct TokenBudgetExceeded {
    pub actual: usize,
    pub limit: usize,
    pub model_id: String,
}

/// Failures from the model invocation collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Network error talking to the model: {0}")]
    Network(String),

    #[error("Model server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Model rejected credentials (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Model rejected the request (HTTP {status}): {message}")]
    Client { status: u16, message: String },
}

impl ModelError {
    /// Timeouts, connection failures and 5xx responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Network(_) | ModelError::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ModelError::Auth { .. })
    }
}

/// Conditions that terminate a repair run before it can report normally.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Authentication failed: {0}. Check ANTHROPIC_API_KEY or `mend config show`.")]
    Auth(String),

    #[error("Failed to run test command `{command}`: {source}")]
    TestCommand {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write audit log: {0}")]
    Audit(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
