//! Structured failure records produced by the output parsers.

use serde::{Deserialize, Serialize};

/// How a test failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Failed,
    Error,
    Timeout,
}

impl FailureStatus {
    /// Map a runner's status word to a failure status. Passing and skipped
    /// statuses return `None`.
    pub fn from_status_word(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "failed" | "fail" | "failure" | "failing" | "broken" | "x" | "✕" | "✗" => {
                Some(FailureStatus::Failed)
            }
            "error" | "errored" | "crashed" => Some(FailureStatus::Error),
            "timeout" | "timedout" | "timed_out" | "timed out" => Some(FailureStatus::Timeout),
            _ => None,
        }
    }

    /// Status words that mean the test did not fail.
    pub fn is_non_failure_word(word: &str) -> bool {
        matches!(
            word.trim().to_lowercase().as_str(),
            "passed"
                | "pass"
                | "ok"
                | "success"
                | "skipped"
                | "skip"
                | "pending"
                | "todo"
                | "disabled"
                | "xfail"
                | "xpass"
                | "ignored"
        )
    }

    /// Upgrade `Failed` to `Timeout` when the failure message says so.
    pub fn refine(self, message: &str) -> Self {
        if self == FailureStatus::Failed && looks_like_timeout(message) {
            FailureStatus::Timeout
        } else {
            self
        }
    }
}

impl std::fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStatus::Failed => write!(f, "failed"),
            FailureStatus::Error => write!(f, "error"),
            FailureStatus::Timeout => write!(f, "timeout"),
        }
    }
}

fn looks_like_timeout(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out")
        || lower.contains("exceeded timeout")
        || lower.contains("timeout >")
        || lower.contains("timeouterror")
        || lower.starts_with("timeout")
}

/// Which test framework produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Jest,
    Pytest,
    Cargo,
    Go,
    Generic,
    #[default]
    Unknown,
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Framework::Jest => "jest",
            Framework::Pytest => "pytest",
            Framework::Cargo => "cargo",
            Framework::Go => "go",
            Framework::Generic => "generic",
            Framework::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// The output format a caller expects, used to pick the first parser tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Auto,
    JestJson,
    PytestJson,
    Json,
    Console,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Auto => "auto",
            OutputFormat::JestJson => "jest-json",
            OutputFormat::PytestJson => "pytest-json",
            OutputFormat::Json => "json",
            OutputFormat::Console => "console",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(OutputFormat::Auto),
            "jest-json" | "jest" => Ok(OutputFormat::JestJson),
            "pytest-json" | "pytest" => Ok(OutputFormat::PytestJson),
            "json" => Ok(OutputFormat::Json),
            "console" | "text" => Ok(OutputFormat::Console),
            _ => anyhow::bail!(
                "Invalid output format '{}'. Valid values: auto, jest-json, pytest-json, json, console",
                s
            ),
        }
    }
}

/// One failing test, as reported by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    /// File or suite path the test lives in (may be empty when unknown).
    pub location: String,
    pub status: FailureStatus,
    pub message: String,
    pub stack_frames: Vec<String>,
    /// Number of raw failures folded into this record. Always at least 1.
    pub duplicate_count: usize,
    /// Short digest of the dedup key, set by the compressor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl TestFailure {
    pub fn new(test_name: &str, location: &str, status: FailureStatus, message: &str) -> Self {
        Self {
            test_name: test_name.trim().to_string(),
            location: location.trim().to_string(),
            status,
            message: message.trim_end().to_string(),
            stack_frames: Vec::new(),
            duplicate_count: 1,
            signature: None,
        }
    }

    pub fn with_frames(mut self, frames: Vec<String>) -> Self {
        self.stack_frames = frames;
        self
    }

    /// `location::name`, or just the name when the location is unknown.
    pub fn qualified_name(&self) -> String {
        if self.location.is_empty() {
            self.test_name.clone()
        } else {
            format!("{}::{}", self.location, self.test_name)
        }
    }
}

/// Everything extracted from one test run's output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedReport {
    pub failures: Vec<TestFailure>,
    /// Raw lines no parser could attribute to a test.
    pub unparsed_remainder: Option<String>,
    pub framework_detected: Framework,
    /// The runner output this report was read from. Compression measures
    /// its savings against this text.
    #[serde(skip)]
    pub raw_output: Option<String>,
}

impl ParsedReport {
    pub fn new(
        failures: Vec<TestFailure>,
        unparsed_remainder: Option<String>,
        framework_detected: Framework,
    ) -> Self {
        let unparsed_remainder = unparsed_remainder.filter(|r| !r.trim().is_empty());
        Self {
            failures,
            unparsed_remainder,
            framework_detected,
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw: &str) -> Self {
        self.raw_output = Some(raw.to_string());
        self
    }

    /// A report with no failures that keeps the whole input as remainder.
    pub fn unparsed(raw: &str) -> Self {
        Self::new(Vec::new(), Some(raw.to_string()), Framework::Unknown)
    }

    pub fn failure_names(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.qualified_name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Split a failure blob (message followed by `at ...` frames) into message and frames.
///
/// Used for JavaScript-style stacks where frames start with `at `.
pub fn split_js_stack(text: &str) -> (String, Vec<String>) {
    let mut message = Vec::new();
    let mut frames = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("at ") {
            frames.push(trimmed.to_string());
        } else if frames.is_empty() {
            message.push(line.trim_end());
        } else if !trimmed.is_empty() {
            // Text after the stack (e.g. "Caused by:") stays with the frames.
            frames.push(trimmed.to_string());
        }
    }

    while message.last().is_some_and(|l| l.trim().is_empty()) {
        message.pop();
    }

    (message.join("\n").trim().to_string(), frames)
}
