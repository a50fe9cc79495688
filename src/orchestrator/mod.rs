//! The repair loop and its collaborators.
//!
//! [`RetryOrchestrator`] owns one of each collaborator behind a trait:
//! - [`TestRunner`] runs the test command
//! - [`ModelClient`] asks the model for a fix
//! - [`FixApplier`] writes the fix into the project
//!
//! and drives them through the parse, compress, validate, invoke cycle.

pub mod fix;
pub mod model;
pub mod prompt;
pub mod retry;
pub mod runner;

pub use fix::{FileBlock, FileBlockApplier, FixApplier, FixSummary, NoopApplier, extract_file_blocks};
pub use model::{ClaudeCliClient, HttpModelClient, ModelClient};
pub use prompt::PromptBuilder;
pub use retry::{RetryConfig, RetryOrchestrator, RunReport, RunStatus};
pub use runner::{ShellTestRunner, TestRun, TestRunner};
