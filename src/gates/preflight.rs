//! Budget gate run before any model call.

use crate::compaction::CompressedReport;
use crate::errors::TokenBudgetExceeded;
use crate::tokens::ModelLimit;
use serde::{Deserialize, Serialize};

/// A prompt that passed the budget gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    /// Report tokens plus prompt scaffolding.
    pub actual: usize,
    /// The model's safe limit.
    pub limit: usize,
    pub model_id: String,
}

impl BudgetCheck {
    pub fn headroom(&self) -> usize {
        self.limit.saturating_sub(self.actual)
    }

    /// Share of the safe limit in use, `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        self.actual as f64 / self.limit as f64
    }
}

/// Compares a compressed report, plus the fixed cost of the prompt template
/// around it, against a model's safe limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreflightValidator {
    scaffold_tokens: usize,
}

impl PreflightValidator {
    pub fn new(scaffold_tokens: usize) -> Self {
        Self { scaffold_tokens }
    }

    pub fn scaffold_tokens(&self) -> usize {
        self.scaffold_tokens
    }

    /// Tokens left for the report itself under `limit`.
    pub fn report_budget(&self, limit: &ModelLimit) -> usize {
        limit.safe_limit().saturating_sub(self.scaffold_tokens)
    }

    pub fn validate(
        &self,
        report: &CompressedReport,
        limit: &ModelLimit,
    ) -> Result<BudgetCheck, TokenBudgetExceeded> {
        let actual = report.compressed_token_estimate + self.scaffold_tokens;
        let safe = limit.safe_limit();

        if actual > safe {
            tracing::info!(
                actual,
                limit = safe,
                model = %limit.model_id,
                "Prompt exceeds model budget"
            );
            return Err(TokenBudgetExceeded {
                actual,
                limit: safe,
                model_id: limit.model_id.clone(),
            });
        }

        Ok(BudgetCheck {
            actual,
            limit: safe,
            model_id: limit.model_id.clone(),
        })
    }
}
