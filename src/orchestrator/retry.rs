//! The bounded repair loop.
//!
//! Each attempt runs the tests once. A passing run ends the loop. Otherwise the
//! output is parsed, compressed to the model's budget, checked by the preflight
//! gate (with recovery when it is over), sent to the model, and the returned
//! fix is applied before the next attempt.

use super::fix::FixApplier;
use super::model::ModelClient;
use super::prompt::PromptBuilder;
use super::runner::{TestRun, TestRunner};
use crate::audit::{AttemptOutcome, AttemptRecord, AuditLogger, BatchRecord, RunConfig, RunOutcome};
use crate::compaction::{CompressionSettings, Compressor};
use crate::errors::{ModelError, RunError, TokenBudgetExceeded};
use crate::gates::{
    PreflightValidator, RecoveryChooser, RecoveryPlan, RecoveryState, RecoveryStrategy,
};
use crate::parser::{OutputFormat, OutputParser};
use crate::tokens::ModelLimit;
use crate::ui::RunUI;
use chrono::Utc;
use std::path::PathBuf;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_CHUNK_SIZE: usize = 10;
pub const DEFAULT_SCAFFOLD_TOKENS: usize = 1_500;

/// Everything the loop needs to know, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub model_id: String,
    pub test_command: String,
    pub project_dir: PathBuf,
    pub max_attempts: u32,
    pub chunk_size: usize,
    pub format: OutputFormat,
    pub compression: CompressionSettings,
    /// Lower bound for the prompt template's token cost.
    pub scaffold_tokens: usize,
    /// Stop after one attempt (dry runs).
    pub stop_after_first: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            model_id: crate::mend_config::DEFAULT_MODEL.to_string(),
            test_command: String::new(),
            project_dir: PathBuf::from("."),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            format: OutputFormat::Auto,
            compression: CompressionSettings::default(),
            scaffold_tokens: DEFAULT_SCAFFOLD_TOKENS,
            stop_after_first: false,
        }
    }
}

/// How a run ended, for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Success { attempts: u32 },
    /// Attempts ran out. Lists every failing test from the last run.
    PartialSuccess { remaining: Vec<String> },
    /// Budget recovery was abandoned. Carries the original budget failure.
    Aborted {
        exceeded: TokenBudgetExceeded,
        remaining: Vec<String>,
    },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success { .. })
    }

    pub fn remaining(&self) -> &[String] {
        match self {
            RunStatus::Success { .. } => &[],
            RunStatus::PartialSuccess { remaining } | RunStatus::Aborted { remaining, .. } => {
                remaining
            }
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success { .. } => 0,
            RunStatus::PartialSuccess { .. } => 1,
            RunStatus::Aborted { .. } => 2,
        }
    }

    fn audit_outcome(&self) -> RunOutcome {
        match self {
            RunStatus::Success { .. } => RunOutcome::Success,
            RunStatus::PartialSuccess { .. } => RunOutcome::PartialSuccess,
            RunStatus::Aborted { .. } => RunOutcome::Aborted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub attempts: Vec<AttemptRecord>,
    pub audit_file: Option<PathBuf>,
}

pub struct RetryOrchestrator {
    config: RetryConfig,
    limit: ModelLimit,
    runner: Box<dyn TestRunner>,
    model: Box<dyn ModelClient>,
    applier: Box<dyn FixApplier>,
    chooser: Box<dyn RecoveryChooser>,
    parser: OutputParser,
    prompt: PromptBuilder,
    validator: PreflightValidator,
    audit: Option<AuditLogger>,
    ui: Option<RunUI>,
    history: Vec<AttemptRecord>,
}

impl RetryOrchestrator {
    pub fn new(
        config: RetryConfig,
        limit: ModelLimit,
        runner: Box<dyn TestRunner>,
        model: Box<dyn ModelClient>,
        applier: Box<dyn FixApplier>,
        chooser: Box<dyn RecoveryChooser>,
    ) -> Self {
        let prompt = PromptBuilder::new(&config.test_command);
        let validator = PreflightValidator::new(config.scaffold_tokens.max(prompt.scaffold_tokens()));
        Self {
            config,
            limit,
            runner,
            model,
            applier,
            chooser,
            parser: OutputParser::new(),
            prompt,
            validator,
            audit: None,
            ui: None,
            history: Vec::new(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_ui(mut self, ui: RunUI) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn validator(&self) -> &PreflightValidator {
        &self.validator
    }

    /// Run until the tests pass, attempts run out, or recovery is aborted.
    ///
    /// Errors only for conditions that end the run abnormally: rejected
    /// credentials, a test command that cannot be started, or an unwritable
    /// audit log.
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        self.history.clear();

        if let Some(audit) = self.audit.as_mut() {
            audit
                .start_run(RunConfig {
                    model_id: self.config.model_id.clone(),
                    test_command: self.config.test_command.clone(),
                    max_attempts: self.config.max_attempts,
                    chunk_size: self.config.chunk_size,
                    input_token_limit: self.limit.input_token_limit,
                    safe_limit: self.limit.safe_limit(),
                    scaffold_tokens: self.validator.scaffold_tokens(),
                    project_dir: self.config.project_dir.clone(),
                    dry_run: self.config.stop_after_first,
                })
                .map_err(RunError::Audit)?;
        }
        if let Some(ui) = &self.ui {
            ui.print_run_header(
                &self.config.model_id,
                self.limit.safe_limit(),
                &self.config.test_command,
            );
        }

        let result = self.run_attempts().await;

        let (outcome, remaining) = match &result {
            Ok(status) => (status.audit_outcome(), status.remaining().to_vec()),
            Err(RunError::Auth(_)) => (RunOutcome::AuthFailed, Vec::new()),
            Err(_) => (RunOutcome::Error, Vec::new()),
        };
        let audit_file = match self.audit.as_mut() {
            Some(audit) => match audit.finish_run(outcome, &remaining) {
                Ok(path) => Some(path),
                Err(e) if result.is_ok() => return Err(RunError::Audit(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to close audit log");
                    None
                }
            },
            None => None,
        };

        let status = result?;
        tracing::info!(outcome = %outcome, attempts = self.history.len(), "Run finished");
        if let Some(ui) = &self.ui {
            ui.print_summary(&status);
        }

        Ok(RunReport {
            status,
            attempts: std::mem::take(&mut self.history),
            audit_file,
        })
    }

    async fn run_attempts(&mut self) -> Result<RunStatus, RunError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut remaining = Vec::new();

        for attempt in 1..=max_attempts {
            tracing::info!(attempt, max_attempts, "Starting attempt");
            if let Some(ui) = &self.ui {
                ui.start_attempt(attempt);
            }
            let started_at = Utc::now();
            let run = self.runner.run().await?;

            if run.passed() {
                let mut record = AttemptRecord::new(attempt, started_at, AttemptOutcome::Fixed);
                record.exit_code = run.exit_code;
                record.finish();
                self.record(record)?;
                if let Some(ui) = &self.ui {
                    ui.attempt_success(attempt);
                }
                return Ok(RunStatus::Success { attempts: attempt });
            }

            let parsed = self.parser.parse(&run.output, self.config.format);
            let mut names = parsed.failure_names();
            if names.is_empty() {
                names.push(unidentified_failure(&run));
            }
            remaining = names.clone();
            if let Some(ui) = &self.ui {
                ui.show_test_result(names.len(), run.exit_code, run.timed_out);
                ui.log_step("compressing report");
            }

            let mut record = AttemptRecord::new(attempt, started_at, AttemptOutcome::StillFailing);
            record.exit_code = run.exit_code;
            record.failing_tests = names;

            let compressor = Compressor::new(self.config.compression.clone());
            let report = compressor.compress(&parsed, self.validator.report_budget(&self.limit));

            let plan = match self.validator.validate(&report, &self.limit) {
                Ok(check) => RecoveryPlan::Single { report, check },
                Err(exceeded) => {
                    if let Some(ui) = &self.ui {
                        ui.show_over_budget(&exceeded);
                    }
                    let mut strategy =
                        RecoveryStrategy::new(self.config.compression.clone(), self.config.chunk_size);
                    strategy.over_budget(exceeded);

                    let validator = &self.validator;
                    let limit = &self.limit;
                    let chooser = self.chooser.as_mut();
                    let mut resolve = || {
                        strategy
                            .resolve(&parsed, validator, limit, chooser)
                            .map(|state| state.clone())
                    };
                    let state = match &self.ui {
                        Some(ui) => ui.suspend(resolve),
                        None => resolve(),
                    }
                    .map_err(RunError::Other)?;
                    record.recovery = strategy.tried().to_vec();

                    match state {
                        RecoveryState::Recovered(plan) => plan,
                        RecoveryState::Aborted(original)
                        | RecoveryState::OverBudget(original)
                        | RecoveryState::AwaitingUserChoice(original) => {
                            record.outcome = AttemptOutcome::BudgetExceeded;
                            record.exceeded = Some(original.clone());
                            record.report = Some(report);
                            record.finish();
                            self.record(record)?;
                            if let Some(ui) = &self.ui {
                                ui.attempt_error(attempt, "over budget");
                            }
                            return Ok(RunStatus::Aborted {
                                exceeded: original,
                                remaining,
                            });
                        }
                        RecoveryState::Ok => {
                            return Err(RunError::Other(anyhow::anyhow!(
                                "Recovery finished without a plan"
                            )));
                        }
                    }
                }
            };

            match plan {
                RecoveryPlan::Single { report, check } => {
                    if let Some(ui) = &self.ui {
                        ui.show_report(&report, &check);
                    }
                    let prompt = self.prompt.build(&report, None);
                    record.report = Some(report);
                    record.budget = Some(check);

                    match self.invoke(attempt, &prompt, None).await? {
                        Ok(response) => {
                            record.fix_summary = Some(self.apply(&response)?);
                            record.model_response = Some(response);
                        }
                        Err(err) => {
                            record.outcome = AttemptOutcome::NetworkError;
                            record.error = Some(err.to_string());
                        }
                    }
                }
                RecoveryPlan::Batches(batches) => {
                    let total = batches.len();
                    for batch in batches {
                        if let Some(ui) = &self.ui {
                            ui.show_report(&batch.report, &batch.check);
                        }
                        let prompt = self.prompt.build(&batch.report, Some((batch.index, total)));
                        let mut batch_record = BatchRecord {
                            index: batch.index,
                            failing_tests: batch
                                .report
                                .failures
                                .iter()
                                .map(|f| f.qualified_name())
                                .collect(),
                            budget: batch.check,
                            outcome: AttemptOutcome::StillFailing,
                            model_response: None,
                            fix_summary: None,
                            error: None,
                        };
                        match self.invoke(attempt, &prompt, Some((batch.index, total))).await? {
                            Ok(response) => {
                                batch_record.fix_summary = Some(self.apply(&response)?);
                                batch_record.model_response = Some(response);
                            }
                            Err(err) => {
                                batch_record.outcome = AttemptOutcome::NetworkError;
                                batch_record.error = Some(err.to_string());
                            }
                        }
                        record.batches.push(batch_record);
                    }
                    // One applied batch is enough for the next run to be meaningful.
                    if record
                        .batches
                        .iter()
                        .all(|b| b.outcome == AttemptOutcome::NetworkError)
                    {
                        record.outcome = AttemptOutcome::NetworkError;
                    }
                }
            }

            let outcome = record.outcome;
            record.finish();
            self.record(record)?;
            tracing::info!(attempt, outcome = %outcome, "Attempt finished");
            if let Some(ui) = &self.ui {
                ui.attempt_continue(attempt, &outcome.to_string());
            }

            if self.config.stop_after_first {
                tracing::info!("Dry run: stopping after the first attempt");
                break;
            }
        }

        Ok(RunStatus::PartialSuccess { remaining })
    }

    /// Call the model. Rejected credentials end the run; every other model
    /// error is handed back for the attempt record.
    async fn invoke(
        &self,
        attempt: u32,
        prompt: &str,
        batch: Option<(usize, usize)>,
    ) -> Result<Result<String, ModelError>, RunError> {
        let kind = match batch {
            Some((index, _)) => format!("batch-{}", index),
            None => String::new(),
        };
        self.artifact(attempt, &kind, "prompt", prompt);
        if let Some(ui) = &self.ui {
            ui.show_model_call(&self.config.model_id, batch);
        }

        match self.model.complete(prompt, &self.config.model_id).await {
            Ok(response) => {
                self.artifact(attempt, &kind, "response", &response);
                Ok(Ok(response))
            }
            Err(err) if err.is_auth() => {
                tracing::error!(error = %err, "Model rejected credentials");
                Err(RunError::Auth(err.to_string()))
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, "Model call failed");
                Ok(Err(err))
            }
        }
    }

    fn apply(&self, response: &str) -> Result<crate::orchestrator::FixSummary, RunError> {
        if let Some(ui) = &self.ui {
            ui.log_step("applying fix");
        }
        let summary = self.applier.apply(response)?;
        if let Some(ui) = &self.ui {
            ui.show_fix(&summary);
        }
        Ok(summary)
    }

    fn artifact(&self, attempt: u32, prefix: &str, kind: &str, content: &str) {
        let Some(audit) = &self.audit else {
            return;
        };
        let kind = if prefix.is_empty() {
            kind.to_string()
        } else {
            format!("{}-{}", prefix, kind)
        };
        if let Err(e) = audit.save_artifact(attempt, &kind, content) {
            tracing::warn!(error = %e, "Failed to save {}", kind);
        }
    }

    fn record(&mut self, record: AttemptRecord) -> Result<(), RunError> {
        if let Some(audit) = self.audit.as_mut() {
            audit.record_attempt(&record).map_err(RunError::Audit)?;
        }
        self.history.push(record);
        Ok(())
    }
}

/// Placeholder name for a failing run whose output named no test.
fn unidentified_failure(run: &TestRun) -> String {
    match (run.timed_out, run.exit_code) {
        (true, _) => "unidentified failure (test command timed out)".to_string(),
        (false, Some(code)) => format!("unidentified failure (exit code {})", code),
        (false, None) => "unidentified failure (test command was killed)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::{FixedChooser, RecoveryChoice};
    use crate::orchestrator::FixSummary;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct MockRunner {
        runs: Arc<AtomicUsize>,
        /// Output per run; the last one repeats. Empty output means a pass.
        outputs: Vec<String>,
    }

    #[async_trait]
    impl TestRunner for MockRunner {
        async fn run(&self) -> Result<TestRun, RunError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            let output = self.outputs[n.min(self.outputs.len() - 1)].clone();
            Ok(TestRun {
                exit_code: Some(if output.is_empty() { 0 } else { 1 }),
                output,
                timed_out: false,
                duration: Duration::from_millis(5),
            })
        }
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Fix,
        Network,
        Auth,
    }

    struct MockModel {
        calls: Arc<AtomicUsize>,
        reply: Reply,
    }

    #[async_trait]
    impl ModelClient for MockModel {
        async fn complete(&self, prompt: &str, model_id: &str) -> Result<String, ModelError> {
            assert!(prompt.contains("FAILING TESTS"));
            assert_eq!(model_id, "mock-model");
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Fix => Ok("<file path=\"src/math.py\">\nfixed\n</file>".to_string()),
                Reply::Network => Err(ModelError::Network("connection reset".into())),
                Reply::Auth => Err(ModelError::Auth {
                    status: 401,
                    message: "invalid x-api-key".into(),
                }),
            }
        }
    }

    struct CountingApplier {
        applied: Arc<AtomicUsize>,
    }

    impl FixApplier for CountingApplier {
        fn apply(&self, _response: &str) -> anyhow::Result<FixSummary> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(FixSummary {
                files_written: vec!["src/math.py".to_string()],
                skipped: Vec::new(),
            })
        }
    }

    struct Harness {
        runs: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
        applied: Arc<AtomicUsize>,
        orchestrator: RetryOrchestrator,
    }

    fn harness(
        outputs: Vec<String>,
        reply: Reply,
        limit: ModelLimit,
        choice: RecoveryChoice,
        tweak: impl FnOnce(&mut RetryConfig),
    ) -> Harness {
        let runs = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let applied = Arc::new(AtomicUsize::new(0));
        let mut config = RetryConfig {
            model_id: "mock-model".to_string(),
            test_command: "pytest -q".to_string(),
            format: OutputFormat::Console,
            scaffold_tokens: 0,
            ..RetryConfig::default()
        };
        tweak(&mut config);
        let orchestrator = RetryOrchestrator::new(
            config,
            limit,
            Box::new(MockRunner {
                runs: runs.clone(),
                outputs,
            }),
            Box::new(MockModel {
                calls: calls.clone(),
                reply,
            }),
            Box::new(CountingApplier {
                applied: applied.clone(),
            }),
            Box::new(FixedChooser::new(choice)),
        );
        Harness {
            runs,
            calls,
            applied,
            orchestrator,
        }
    }

    fn roomy() -> ModelLimit {
        ModelLimit::new("mock-model", 100_000, 0.95)
    }

    const FAILING: &str = "FAILED tests/test_math.py::test_add - assert 1 == 2\n\
                           FAILED tests/test_math.py::test_sub - assert 3 == 4\n";

    /// `n` failures whose messages are `words` words long.
    fn big_output(n: usize, words: usize) -> String {
        (0..n)
            .map(|i| {
                format!(
                    "FAILED tests/test_big.py::test_{} - AssertionError: {}{}\n",
                    i,
                    "word ".repeat(words),
                    i
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_success_on_second_run() {
        let mut h = harness(
            vec![FAILING.to_string(), String::new()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |_| {},
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(report.status, RunStatus::Success { attempts: 2 });
        assert_eq!(h.runs.load(Ordering::SeqCst), 2);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.applied.load(Ordering::SeqCst), 1);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::StillFailing);
        assert_eq!(
            report.attempts[0].failing_tests,
            vec![
                "tests/test_math.py::test_add".to_string(),
                "tests/test_math.py::test_sub".to_string()
            ]
        );
        assert!(report.attempts[0].budget.is_some());
        assert_eq!(report.attempts[1].outcome, AttemptOutcome::Fixed);
    }

    #[tokio::test]
    async fn test_at_most_max_attempts_runs() {
        let mut h = harness(
            vec![FAILING.to_string()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |c| c.max_attempts = 3,
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(h.runs.load(Ordering::SeqCst), 3);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(
            report.status,
            RunStatus::PartialSuccess {
                remaining: vec![
                    "tests/test_math.py::test_add".to_string(),
                    "tests/test_math.py::test_sub".to_string()
                ]
            }
        );
        assert_eq!(report.status.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_remaining_lists_duplicates_individually() {
        let output = "FAILED tests/a.py::test_one - AssertionError: boom\n\
                      FAILED tests/a.py::test_two - AssertionError: boom\n\
                      FAILED tests/a.py::test_three - AssertionError: boom\n";
        let mut h = harness(
            vec![output.to_string()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |c| c.max_attempts = 1,
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(report.status.remaining().len(), 3);
        let compressed = report.attempts[0].report.as_ref().unwrap();
        assert_eq!(compressed.failures.len(), 1);
        assert_eq!(compressed.failures[0].duplicate_count, 3);
    }

    #[tokio::test]
    async fn test_abort_makes_no_model_calls_and_lists_original_failures() {
        let limit = ModelLimit::new("mock-model", 500, 1.0);
        let mut h = harness(
            vec![big_output(30, 200)],
            Reply::Fix,
            limit,
            RecoveryChoice::Abort,
            |_| {},
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.runs.load(Ordering::SeqCst), 1);
        match &report.status {
            RunStatus::Aborted {
                exceeded,
                remaining,
            } => {
                assert_eq!(exceeded.limit, 500);
                assert_eq!(exceeded.model_id, "mock-model");
                assert!(exceeded.actual > 500);
                assert_eq!(remaining.len(), 30);
                assert_eq!(remaining[0], "tests/test_big.py::test_0");
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(report.status.exit_code(), 2);

        let record = &report.attempts[0];
        assert_eq!(record.outcome, AttemptOutcome::BudgetExceeded);
        assert_eq!(record.recovery, vec![RecoveryChoice::Abort]);
        assert!(record.exceeded.is_some());
    }

    #[tokio::test]
    async fn test_aggressive_recovery_reaches_the_model() {
        let limit = ModelLimit::new("mock-model", 2_000, 1.0);
        let mut h = harness(
            vec![big_output(30, 60)],
            Reply::Fix,
            limit,
            RecoveryChoice::AggressiveTruncate,
            |c| c.max_attempts = 1,
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        let record = &report.attempts[0];
        assert_eq!(record.recovery, vec![RecoveryChoice::AggressiveTruncate]);
        let compressed = record.report.as_ref().unwrap();
        assert!(compressed.omitted_count > 0);
        assert!(record.budget.as_ref().unwrap().actual <= 2_000);
    }

    #[tokio::test]
    async fn test_chunked_batches_share_one_test_run() {
        let limit = ModelLimit::new("mock-model", 2_500, 1.0);
        let mut h = harness(
            vec![big_output(25, 100)],
            Reply::Fix,
            limit,
            RecoveryChoice::ChunkedBatch,
            |c| {
                c.max_attempts = 1;
                c.chunk_size = 10;
            },
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(h.runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.applied.load(Ordering::SeqCst), 3);
        let record = &report.attempts[0];
        assert_eq!(record.batches.len(), 3);
        assert_eq!(record.batches[0].failing_tests.len(), 10);
        assert_eq!(record.batches[2].failing_tests.len(), 5);
        assert_eq!(record.outcome, AttemptOutcome::StillFailing);
    }

    #[tokio::test]
    async fn test_network_error_counts_toward_attempts() {
        let mut h = harness(
            vec![FAILING.to_string()],
            Reply::Network,
            roomy(),
            RecoveryChoice::Abort,
            |c| c.max_attempts = 2,
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(h.runs.load(Ordering::SeqCst), 2);
        assert_eq!(h.applied.load(Ordering::SeqCst), 0);
        assert!(
            report
                .attempts
                .iter()
                .all(|a| a.outcome == AttemptOutcome::NetworkError)
        );
        assert!(report.attempts[0].error.as_ref().unwrap().contains("connection reset"));
        assert!(matches!(report.status, RunStatus::PartialSuccess { .. }));
    }

    #[tokio::test]
    async fn test_auth_error_is_fatal_and_audited() {
        let dir = TempDir::new().unwrap();
        let h = harness(
            vec![FAILING.to_string()],
            Reply::Auth,
            roomy(),
            RecoveryChoice::Abort,
            |_| {},
        );
        let mut orchestrator = h
            .orchestrator
            .with_audit(AuditLogger::new(&dir.path().join("audit")));

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, RunError::Auth(_)));
        assert_eq!(h.runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let audit = AuditLogger::new(&dir.path().join("audit"));
        let run = audit.latest_run().unwrap().unwrap();
        assert_eq!(run.outcome, Some(RunOutcome::AuthFailed));
    }

    #[tokio::test]
    async fn test_unparseable_output_uses_placeholder_name() {
        let mut h = harness(
            vec!["Segmentation fault (core dumped)\n".to_string()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |c| c.max_attempts = 1,
        );
        let report = h.orchestrator.run().await.unwrap();

        assert_eq!(
            report.status.remaining(),
            &["unidentified failure (exit code 1)".to_string()]
        );
        // The raw output still reaches the model.
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        let compressed = report.attempts[0].report.as_ref().unwrap();
        assert!(compressed.rendered.contains("Segmentation fault"));
    }

    #[tokio::test]
    async fn test_dry_run_stops_after_first_attempt() {
        let mut h = harness(
            vec![FAILING.to_string()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |c| c.stop_after_first = true,
        );
        let report = h.orchestrator.run().await.unwrap();
        assert_eq!(h.runs.load(Ordering::SeqCst), 1);
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_attempts_written_to_audit_log() {
        let dir = TempDir::new().unwrap();
        let h = harness(
            vec![FAILING.to_string(), String::new()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |_| {},
        );
        let audit = AuditLogger::new(&dir.path().join("audit"))
            .with_artifact_dir(&dir.path().join("logs"));
        let mut orchestrator = h.orchestrator.with_audit(audit);

        let report = orchestrator.run().await.unwrap();
        let path = report.audit_file.unwrap();
        let run = AuditLogger::new(&dir.path().join("audit"))
            .load_run(&path)
            .unwrap();
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.outcome, Some(RunOutcome::Success));
        assert_eq!(run.config.model_id, "mock-model");
        assert_eq!(
            run.attempts[0].model_response.as_deref(),
            Some("<file path=\"src/math.py\">\nfixed\n</file>")
        );
    }

    #[test]
    fn test_validator_scaffold_covers_template() {
        let h = harness(
            vec![String::new()],
            Reply::Fix,
            roomy(),
            RecoveryChoice::Abort,
            |c| c.scaffold_tokens = 0,
        );
        assert_eq!(
            h.orchestrator.validator().scaffold_tokens(),
            PromptBuilder::new("pytest -q").scaffold_tokens()
        );
    }
}
