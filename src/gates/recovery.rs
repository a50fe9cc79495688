//! Over-budget recovery.
//!
//! When the preflight gate rejects a prompt, [`RecoveryStrategy`] walks a small
//! state machine:
//!
//! ```text
//! Ok -> OverBudget -> AwaitingUserChoice -> Recovered | Aborted
//!                            ^                  |
//!                            +-- still over ----+
//! ```
//!
//! A [`RecoveryChooser`] picks between the three options. Picking a strategy
//! that has already failed for this report aborts.

use super::preflight::{BudgetCheck, PreflightValidator};
use crate::compaction::{CompressedReport, CompressionSettings, Compressor, dedup};
use crate::errors::TokenBudgetExceeded;
use crate::parser::ParsedReport;
use crate::tokens::ModelLimit;
use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use serde::{Deserialize, Serialize};

/// The three ways out of an over-budget state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryChoice {
    /// Recompress with the lossy profile and re-validate.
    AggressiveTruncate,
    /// Split failures into fixed-size batches, each its own prompt.
    ChunkedBatch,
    Abort,
}

impl std::fmt::Display for RecoveryChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryChoice::AggressiveTruncate => write!(f, "truncate"),
            RecoveryChoice::ChunkedBatch => write!(f, "chunk"),
            RecoveryChoice::Abort => write!(f, "abort"),
        }
    }
}

impl std::str::FromStr for RecoveryChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "truncate" | "aggressive" | "aggressive-truncate" => Ok(RecoveryChoice::AggressiveTruncate),
            "chunk" | "chunked" | "chunked-batch" => Ok(RecoveryChoice::ChunkedBatch),
            "abort" => Ok(RecoveryChoice::Abort),
            _ => anyhow::bail!(
                "Invalid recovery choice '{}'. Valid values: truncate, chunk, abort",
                s
            ),
        }
    }
}

/// One independently validated slice of the failures.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based.
    pub index: usize,
    pub report: CompressedReport,
    pub check: BudgetCheck,
}

/// What the orchestrator sends to the model after a successful recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryPlan {
    Single {
        report: CompressedReport,
        check: BudgetCheck,
    },
    Batches(Vec<Batch>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryState {
    Ok,
    OverBudget(TokenBudgetExceeded),
    AwaitingUserChoice(TokenBudgetExceeded),
    Recovered(RecoveryPlan),
    /// Carries the first budget failure, not the last.
    Aborted(TokenBudgetExceeded),
}

/// Source of recovery decisions.
pub trait RecoveryChooser: Send {
    /// Pick the next option. `tried` lists the options already attempted for
    /// this report, oldest first.
    fn choose(
        &mut self,
        exceeded: &TokenBudgetExceeded,
        tried: &[RecoveryChoice],
    ) -> Result<RecoveryChoice>;
}

/// Always answers with the configured choice.
#[derive(Debug, Clone, Copy)]
pub struct FixedChooser {
    choice: RecoveryChoice,
}

impl FixedChooser {
    pub fn new(choice: RecoveryChoice) -> Self {
        Self { choice }
    }
}

impl RecoveryChooser for FixedChooser {
    fn choose(&mut self, exceeded: &TokenBudgetExceeded, _tried: &[RecoveryChoice]) -> Result<RecoveryChoice> {
        tracing::info!(choice = %self.choice, actual = exceeded.actual, "Applying configured recovery");
        Ok(self.choice)
    }
}

/// Menu order of the interactive prompt.
const MENU_CHOICES: [RecoveryChoice; 3] = [
    RecoveryChoice::AggressiveTruncate,
    RecoveryChoice::ChunkedBatch,
    RecoveryChoice::Abort,
];

fn menu_text(choice: RecoveryChoice) -> &'static str {
    match choice {
        RecoveryChoice::AggressiveTruncate => "Aggressive truncate (drop stacks, may omit failures)",
        RecoveryChoice::ChunkedBatch => "Chunked batches (one prompt per batch)",
        RecoveryChoice::Abort => "Abort",
    }
}

/// Asks on the terminal.
#[derive(Debug, Default)]
pub struct InteractiveChooser;

impl RecoveryChooser for InteractiveChooser {
    fn choose(
        &mut self,
        exceeded: &TokenBudgetExceeded,
        tried: &[RecoveryChoice],
    ) -> Result<RecoveryChoice> {
        println!();
        println!(
            "  {} prompt needs ~{} tokens; {} accepts {}",
            style("Over budget:").yellow().bold(),
            style(exceeded.actual).bold(),
            style(&exceeded.model_id).cyan(),
            style(exceeded.limit).bold()
        );

        let label = |choice: RecoveryChoice, text: &str| {
            if tried.contains(&choice) {
                format!("{} (already tried, choosing again aborts)", text)
            } else {
                text.to_string()
            }
        };
        let options: Vec<String> = MENU_CHOICES
            .iter()
            .map(|&choice| label(choice, menu_text(choice)))
            .collect();

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How should the report be reduced?")
            .items(&options)
            .default(0)
            .interact()?;

        MENU_CHOICES
            .get(selection)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown recovery option {}", selection))
    }
}

/// Drives one over-budget report to `Recovered` or `Aborted`.
pub struct RecoveryStrategy {
    state: RecoveryState,
    settings: CompressionSettings,
    chunk_size: usize,
    tried: Vec<RecoveryChoice>,
}

impl RecoveryStrategy {
    pub fn new(settings: CompressionSettings, chunk_size: usize) -> Self {
        Self {
            state: RecoveryState::Ok,
            settings,
            chunk_size: chunk_size.max(1),
            tried: Vec::new(),
        }
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    /// Options taken so far, oldest first.
    pub fn tried(&self) -> &[RecoveryChoice] {
        &self.tried
    }

    /// `Ok -> OverBudget`.
    pub fn over_budget(&mut self, exceeded: TokenBudgetExceeded) {
        self.state = RecoveryState::OverBudget(exceeded);
    }

    /// Run the machine until it reaches `Recovered` or `Aborted`.
    ///
    /// Errors only when the chooser itself fails (e.g. no terminal).
    pub fn resolve(
        &mut self,
        parsed: &ParsedReport,
        validator: &PreflightValidator,
        limit: &ModelLimit,
        chooser: &mut dyn RecoveryChooser,
    ) -> Result<&RecoveryState> {
        let original = match &self.state {
            RecoveryState::OverBudget(e) | RecoveryState::AwaitingUserChoice(e) => e.clone(),
            _ => return Ok(&self.state),
        };
        let mut current = original.clone();

        loop {
            self.state = RecoveryState::AwaitingUserChoice(current.clone());
            let choice = chooser.choose(&current, &self.tried)?;
            let repeated = self.tried.contains(&choice);
            self.tried.push(choice);

            if choice == RecoveryChoice::Abort || repeated {
                tracing::info!(choice = %choice, repeated, "Recovery aborted");
                self.state = RecoveryState::Aborted(original);
                return Ok(&self.state);
            }

            let outcome = match choice {
                RecoveryChoice::AggressiveTruncate => self.aggressive(parsed, validator, limit),
                RecoveryChoice::ChunkedBatch => self.chunked(parsed, validator, limit),
                RecoveryChoice::Abort => unreachable!(),
            };

            match outcome {
                Ok(plan) => {
                    tracing::info!(choice = %choice, "Recovered from over-budget report");
                    self.state = RecoveryState::Recovered(plan);
                    return Ok(&self.state);
                }
                Err(still_over) => {
                    tracing::info!(
                        choice = %choice,
                        actual = still_over.actual,
                        limit = still_over.limit,
                        "Recovery attempt still over budget"
                    );
                    current = still_over;
                }
            }
        }
    }

    fn aggressive(
        &self,
        parsed: &ParsedReport,
        validator: &PreflightValidator,
        limit: &ModelLimit,
    ) -> Result<RecoveryPlan, TokenBudgetExceeded> {
        let compressor = Compressor::new(self.settings.aggressive());
        let report = compressor.compress(parsed, validator.report_budget(limit));
        let check = validator.validate(&report, limit)?;
        Ok(RecoveryPlan::Single { report, check })
    }

    /// Each batch is compressed with the base profile, falling back to the
    /// lossy one for that batch alone.
    fn chunked(
        &self,
        parsed: &ParsedReport,
        validator: &PreflightValidator,
        limit: &ModelLimit,
    ) -> Result<RecoveryPlan, TokenBudgetExceeded> {
        let budget = validator.report_budget(limit);
        let base = Compressor::new(self.settings.clone());
        let lossy = Compressor::new(self.settings.aggressive());

        let distinct = dedup(&parsed.failures);
        let mut batches = Vec::new();

        for (i, chunk) in partition(&distinct, self.chunk_size).into_iter().enumerate() {
            let slice = ParsedReport::new(chunk, None, parsed.framework_detected);
            let report = base.compress(&slice, budget);
            let (report, check) = match validator.validate(&report, limit) {
                Ok(check) => (report, check),
                Err(_) => {
                    let report = lossy.compress(&slice, budget);
                    let check = validator.validate(&report, limit)?;
                    (report, check)
                }
            };
            batches.push(Batch {
                index: i + 1,
                report,
                check,
            });
        }

        if batches.is_empty() {
            // Nothing to split: the size came from unparsed output.
            return self.aggressive(parsed, validator, limit);
        }

        Ok(RecoveryPlan::Batches(batches))
    }
}

/// Split into consecutive batches of at most `size`.
pub fn partition<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}
