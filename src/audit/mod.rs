//! Attempt history for repair runs.
//!
//! Each run is one JSON Lines file under `.mend/audit/runs/`. The first line is
//! a `run_started` event, every attempt appends an `attempt` event as soon as
//! it completes, and a `run_finished` event closes the file. An interrupted run
//! simply lacks the last line.

use crate::compaction::CompressedReport;
use crate::errors::TokenBudgetExceeded;
use crate::gates::{BudgetCheck, RecoveryChoice};
use crate::orchestrator::FixSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Settings a run started with, recorded once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub model_id: String,
    pub test_command: String,
    pub max_attempts: u32,
    pub chunk_size: usize,
    pub input_token_limit: usize,
    pub safe_limit: usize,
    pub scaffold_tokens: usize,
    pub project_dir: PathBuf,
    #[serde(default)]
    pub dry_run: bool,
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The test run passed.
    Fixed,
    /// A fix was applied; the next run decides whether it worked.
    StillFailing,
    /// The prompt could not be brought under the model's limit.
    BudgetExceeded,
    /// The model could not be reached after retries.
    NetworkError,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Fixed => write!(f, "fixed"),
            AttemptOutcome::StillFailing => write!(f, "still_failing"),
            AttemptOutcome::BudgetExceeded => write!(f, "budget_exceeded"),
            AttemptOutcome::NetworkError => write!(f, "network_error"),
        }
    }
}

/// One batch of a chunked attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// 1-based.
    pub index: usize,
    pub failing_tests: Vec<String>,
    pub budget: BudgetCheck,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_summary: Option<FixSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// `None` when the test command was killed.
    pub exit_code: Option<i32>,
    /// Every failing test name this attempt's run reported, duplicates included.
    #[serde(default)]
    pub failing_tests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<CompressedReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_response: Option<String>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery: Vec<RecoveryChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<BatchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_summary: Option<FixSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceeded: Option<TokenBudgetExceeded>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn new(attempt_number: u32, started_at: DateTime<Utc>, outcome: AttemptOutcome) -> Self {
        Self {
            attempt_number,
            started_at,
            duration_secs: 0.0,
            exit_code: None,
            failing_tests: Vec::new(),
            report: None,
            model_response: None,
            outcome,
            recovery: Vec::new(),
            batches: Vec::new(),
            fix_summary: None,
            budget: None,
            exceeded: None,
            error: None,
        }
    }

    /// Stamp the elapsed time since `started_at`.
    pub fn finish(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.duration_secs = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
    }
}

/// How a whole run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialSuccess,
    Aborted,
    AuthFailed,
    Error,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunOutcome::Success => "success",
            RunOutcome::PartialSuccess => "partial_success",
            RunOutcome::Aborted => "aborted",
            RunOutcome::AuthFailed => "auth_failed",
            RunOutcome::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// One line of a run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        run_id: Uuid,
        started_at: DateTime<Utc>,
        config: RunConfig,
    },
    Attempt(AttemptRecord),
    RunFinished {
        run_id: Uuid,
        ended_at: DateTime<Utc>,
        outcome: RunOutcome,
        #[serde(default)]
        remaining: Vec<String>,
    },
}

/// A run file folded back into one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: Option<RunOutcome>,
    pub remaining: Vec<String>,
}

impl AuditRun {
    /// `false` for a run that was interrupted before `run_finished`.
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

pub mod logger;
pub use logger::AuditLogger;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_event_is_tagged() {
        let record = AttemptRecord::new(2, Utc::now(), AttemptOutcome::NetworkError);
        let json = serde_json::to_value(AuditEvent::Attempt(record)).unwrap();
        assert_eq!(json["event"], "attempt");
        assert_eq!(json["attempt_number"], 2);
        assert_eq!(json["outcome"], "network_error");
        assert!(json.get("report").is_none());
    }

    #[test]
    fn test_attempt_record_round_trips_through_event() {
        let mut record = AttemptRecord::new(1, Utc::now(), AttemptOutcome::BudgetExceeded);
        record.recovery = vec![RecoveryChoice::Abort];
        record.exceeded = Some(TokenBudgetExceeded {
            actual: 130_000,
            limit: 128_000,
            model_id: "gpt-4o".into(),
        });
        let line = serde_json::to_string(&AuditEvent::Attempt(record.clone())).unwrap();
        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, AuditEvent::Attempt(record));
    }

    #[test]
    fn test_attempt_finish_sets_duration() {
        let started = Utc::now() - chrono::Duration::seconds(3);
        let mut record = AttemptRecord::new(1, started, AttemptOutcome::Fixed);
        record.finish();
        assert!(record.duration_secs >= 3.0);
    }
}
