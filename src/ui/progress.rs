use crate::compaction::CompressedReport;
use crate::errors::TokenBudgetExceeded;
use crate::gates::BudgetCheck;
use crate::orchestrator::{FixSummary, RunStatus};
use crate::ui::icons::{BUDGET, CHECK, COMPRESS, CROSS, FILE_MOD, MODEL, SPARKLE, TEST, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Names listed in the final summary before the rest are counted.
const MAX_SUMMARY_NAMES: usize = 25;

/// Terminal UI for a repair run, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Attempt bar: how many attempts have been used
/// - Step bar: spinner with the current step of the current attempt
pub struct RunUI {
    multi: MultiProgress,
    attempt_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
    current_attempt: AtomicU32,
    max_attempts: AtomicU32,
}

impl RunUI {
    /// Call once before the first attempt.
    pub fn new(max_attempts: u32, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let attempt_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");

        let attempt_bar = multi.add(ProgressBar::new(max_attempts as u64));
        attempt_bar.set_style(attempt_style);
        attempt_bar.set_prefix("Attempts");

        let step_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(step_style);
        step_bar.set_prefix("    Step");

        Self {
            multi,
            attempt_bar,
            step_bar,
            verbose,
            current_attempt: AtomicU32::new(0),
            max_attempts: AtomicU32::new(max_attempts),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Run `f` with the bars hidden, for interactive prompts.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    pub fn print_run_header(&self, model_id: &str, safe_limit: usize, command: &str) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} Repairing: {}",
            style("▶").green().bold(),
            style(command).yellow().bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{}  {} (safe limit {} tokens)",
            style("Model:").dim(),
            style(model_id).cyan(),
            safe_limit
        ));
        self.print_line(format!(
            "{}  {} attempts max",
            style("Budget:").dim(),
            self.max_attempts.load(Ordering::SeqCst)
        ));
        self.print_line("");
    }

    pub fn start_attempt(&self, attempt: u32) {
        self.current_attempt.store(attempt, Ordering::SeqCst);
        self.attempt_bar
            .set_message(format!("attempt {}", style(attempt).cyan()));
        self.step_bar.reset();
        self.step_bar.enable_steady_tick(Duration::from_millis(100));
        self.log_step("running tests");
    }

    /// Update the spinner with a short lowercase status, e.g. `"calling model"`.
    ///
    /// In verbose mode the message is also printed as a dim indented line.
    pub fn log_step(&self, msg: &str) {
        let attempt = self.current_attempt.load(Ordering::SeqCst);
        let max = self.max_attempts.load(Ordering::SeqCst);
        self.step_bar.set_message(format!(
            "Attempt {}/{} {}",
            style(attempt).cyan(),
            max,
            style(format!("({})", msg)).dim()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    pub fn show_test_result(&self, failing: usize, exit_code: Option<i32>, timed_out: bool) {
        let exit = match (timed_out, exit_code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exit {}", code),
            (false, None) => "killed".to_string(),
        };
        self.print_line(format!(
            "    {} {} failing {}",
            TEST,
            style(failing).red().bold(),
            style(format!("({})", exit)).dim()
        ));
    }

    /// Token accounting for a report that passed the gate. Omissions are
    /// always shown.
    pub fn show_report(&self, report: &CompressedReport, check: &BudgetCheck) {
        self.print_line(format!(
            "    {} {} distinct of {} failing, ~{} → ~{} tokens ({:.0}% smaller, {})",
            COMPRESS,
            style(report.failures.len()).cyan(),
            report.represented_count() + report.omitted_count,
            report.original_token_estimate,
            style(report.compressed_token_estimate).green(),
            report.reduction() * 100.0,
            report.level
        ));
        self.print_line(format!(
            "    {} prompt ~{} of {} tokens ({:.0}%)",
            BUDGET,
            check.actual,
            check.limit,
            check.utilization() * 100.0
        ));
        if report.omitted_count > 0 {
            self.print_line(format!(
                "    {} {} failing tests omitted to fit the budget",
                WARN,
                style(report.omitted_count).yellow().bold()
            ));
        }
    }

    pub fn show_over_budget(&self, exceeded: &TokenBudgetExceeded) {
        self.print_line(format!(
            "    {} {}",
            WARN,
            style(exceeded.to_string()).yellow()
        ));
    }

    pub fn show_model_call(&self, model_id: &str, batch: Option<(usize, usize)>) {
        let target = match batch {
            Some((i, n)) => format!("{} (batch {}/{})", model_id, i, n),
            None => model_id.to_string(),
        };
        self.log_step("calling model");
        self.print_line(format!("    {} {}", MODEL, style(target).cyan()));
    }

    pub fn show_fix(&self, summary: &FixSummary) {
        if summary.files_written.is_empty() {
            self.print_line(format!(
                "    {} {}",
                WARN,
                style("model response changed no files").yellow()
            ));
        }
        for path in &summary.files_written {
            self.print_line(format!("    {} {}", FILE_MOD, style(path).yellow()));
        }
        if self.verbose {
            for skipped in &summary.skipped {
                self.print_line(format!("    {} {}", style("-").dim(), style(skipped).dim()));
            }
        }
    }

    pub fn attempt_success(&self, attempt: u32) {
        self.attempt_bar.inc(1);
        self.step_bar
            .finish_with_message(format!("{} Attempt {}: tests pass", CHECK, attempt));
    }

    pub fn attempt_continue(&self, attempt: u32, outcome: &str) {
        self.attempt_bar.inc(1);
        self.step_bar
            .finish_with_message(format!("Attempt {} - {}, continuing...", attempt, outcome));
    }

    pub fn attempt_error(&self, attempt: u32, msg: &str) {
        self.attempt_bar.inc(1);
        self.step_bar
            .finish_with_message(format!("{} Attempt {} failed: {}", CROSS, attempt, msg));
    }

    /// Final banner. Lists every still-failing test.
    pub fn print_summary(&self, status: &RunStatus) {
        self.attempt_bar.finish_and_clear();
        match status {
            RunStatus::Success { attempts } => {
                self.print_line(format!(
                    "\n{} All tests pass after {} attempt(s)\n",
                    SPARKLE,
                    style(attempts).green().bold()
                ));
            }
            RunStatus::PartialSuccess { remaining } => {
                self.print_line(format!(
                    "\n{} Attempts exhausted; {} test(s) still failing:",
                    CROSS,
                    style(remaining.len()).red().bold()
                ));
                self.print_names(remaining);
            }
            RunStatus::Aborted {
                exceeded,
                remaining,
            } => {
                self.print_line(format!("\n{} Aborted: {}", CROSS, style(exceeded).red()));
                self.print_line(format!(
                    "{} test(s) still failing:",
                    style(remaining.len()).red().bold()
                ));
                self.print_names(remaining);
            }
        }
    }

    fn print_names(&self, names: &[String]) {
        for name in names.iter().take(MAX_SUMMARY_NAMES) {
            let wrapped = textwrap::fill(
                name,
                textwrap::Options::new(96)
                    .initial_indent("  - ")
                    .subsequent_indent("      "),
            );
            self.print_line(wrapped);
        }
        if names.len() > MAX_SUMMARY_NAMES {
            self.print_line(format!(
                "  {} and {} more",
                style("…").dim(),
                names.len() - MAX_SUMMARY_NAMES
            ));
        }
        self.print_line("");
    }
}
