//! Test Output Parsing
//!
//! Turns the raw output of any test runner into a [`ParsedReport`].
//!
//! ## Variants
//!
//! - **Jest JSON**: `jest --json` reports, including suite-level failures
//! - **pytest JSON**: `pytest --json-report` reports, including collection errors
//! - **Generic JSON**: any JSON with arrays of test-shaped objects
//! - **Console text**: pytest, Jest, cargo test and go test console output
//!
//! Each variant implements [`ReportParser`]. [`OutputParser`] tries them in a
//! fixed order, starting from the caller's format hint, and always ends with
//! the console parser so parsing as a whole never fails.
//!
//! ## Usage
//!
//! ```ignore
//! use mend::parser::{OutputFormat, OutputParser};
//!
//! let report = OutputParser::new().parse(&raw_output, OutputFormat::Auto);
//! for failure in &report.failures {
//!     println!("{}: {}", failure.qualified_name(), failure.message);
//! }
//! ```

mod console;
mod generic;
mod jest;
mod pytest;
mod types;

pub use console::ConsoleTextParser;
pub use generic::GenericJsonParser;
pub use jest::{JestJsonParser, SUITE_FAILURE_NAME};
pub use pytest::{PytestJsonParser, split_longrepr, split_nodeid};
pub use types::{
    FailureStatus, Framework, OutputFormat, ParsedReport, TestFailure, split_js_stack,
};

use crate::errors::ParseError;
use crate::util::extract_json;
use serde_json::Value;

/// One way of reading test output.
pub trait ReportParser: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Parse `raw`, or explain why this variant does not apply.
    fn parse(&self, raw: &str) -> Result<ParsedReport, ParseError>;
}

/// Load a JSON document from `raw`, tolerating banners and log lines around it.
pub(crate) fn load_json(raw: &str) -> Result<Value, ParseError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Ok(value);
        }
    }

    match extract_json(raw) {
        Some(json) if dominates(&json, raw) => Ok(serde_json::from_str(&json)?),
        Some(_) => Err(ParseError::EmbeddedJson),
        None => Err(ParseError::NoJson),
    }
}

/// An extracted document counts as the report only when it carries at least
/// half of the visible characters. Smaller fragments are log payloads or
/// assertion values inside console output.
fn dominates(json: &str, raw: &str) -> bool {
    let visible = |s: &str| s.chars().filter(|c| !c.is_whitespace()).count();
    visible(json) * 2 >= visible(raw)
}

/// Runs the parser variants in fallback order.
pub struct OutputParser {
    jest: JestJsonParser,
    pytest: PytestJsonParser,
    generic: GenericJsonParser,
    console: ConsoleTextParser,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            jest: JestJsonParser,
            pytest: PytestJsonParser,
            generic: GenericJsonParser,
            console: ConsoleTextParser,
        }
    }

    /// Variants to try for `hint`, in order.
    fn chain(&self, hint: OutputFormat) -> Vec<&dyn ReportParser> {
        match hint {
            OutputFormat::JestJson => vec![&self.jest, &self.generic, &self.console],
            OutputFormat::PytestJson => vec![&self.pytest, &self.generic, &self.console],
            OutputFormat::Json => vec![&self.generic, &self.console],
            OutputFormat::Console => vec![&self.console],
            OutputFormat::Auto => vec![&self.jest, &self.pytest, &self.generic, &self.console],
        }
    }

    /// Parse `raw`. Never fails: when every variant declines, the whole input
    /// comes back as the unparsed remainder.
    pub fn parse(&self, raw: &str, hint: OutputFormat) -> ParsedReport {
        for parser in self.chain(hint) {
            match parser.parse(raw) {
                Ok(report) => {
                    tracing::debug!(
                        parser = parser.name(),
                        failures = report.failures.len(),
                        framework = %report.framework_detected,
                        "Parsed test output"
                    );
                    return report.with_raw_output(raw);
                }
                Err(e) => {
                    tracing::debug!(parser = parser.name(), error = %e, "Parser declined output");
                }
            }
        }
        ParsedReport::unparsed(raw).with_raw_output(raw)
    }
}
