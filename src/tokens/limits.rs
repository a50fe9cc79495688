//! Model input limits and safety margins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Limit used when a model identifier matches nothing we know about.
pub const DEFAULT_INPUT_TOKEN_LIMIT: usize = 32_000;

/// Fraction of the stated limit we allow a prompt to occupy.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.95;

/// A model's input token limit and the headroom we keep below it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLimit {
    pub model_id: String,
    pub input_token_limit: usize,
    pub safety_margin_fraction: f64,
}

impl ModelLimit {
    pub fn new(model_id: &str, input_token_limit: usize, safety_margin_fraction: f64) -> Self {
        Self {
            model_id: model_id.to_string(),
            input_token_limit,
            safety_margin_fraction,
        }
    }

    /// `floor(input_token_limit * safety_margin_fraction)`.
    pub fn safe_limit(&self) -> usize {
        // Absorb binary rounding so 200_000 * 0.95 is 190_000, not 189_999.
        (self.input_token_limit as f64 * self.safety_margin_fraction + 1e-6).floor() as usize
    }
}

/// Built-in table: (canonical id, family name used for partial matching, input limit).
const KNOWN_MODELS: &[(&str, &str, usize)] = &[
    ("claude-opus-4", "opus", 200_000),
    ("claude-sonnet-4", "sonnet", 200_000),
    ("claude-haiku-4", "haiku", 200_000),
    ("gpt-4o", "gpt-4o", 128_000),
    ("gpt-4-turbo", "gpt-4-turbo", 128_000),
    ("gpt-4.1", "gpt-4.1", 1_047_576),
    ("gemini-2.5-pro", "gemini", 1_048_576),
    ("deepseek-chat", "deepseek", 64_000),
    ("llama-3.1-70b", "llama", 128_000),
    ("mistral-large", "mistral", 128_000),
];

/// Resolves model identifiers to [`ModelLimit`]s.
///
/// Resolution order:
/// 1. Exact id match (configured overrides first, then the built-in table)
/// 2. Case-insensitive family match (`"sonnet"` resolves to `claude-sonnet-4`)
/// 3. [`DEFAULT_INPUT_TOKEN_LIMIT`] with a logged warning
///
/// Lookup never fails.
#[derive(Debug, Clone)]
pub struct ModelLimitRegistry {
    overrides: Vec<ModelLimit>,
    default_margin: f64,
}

impl Default for ModelLimitRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

impl ModelLimitRegistry {
    /// Create a registry whose built-in entries use `default_margin`.
    pub fn new(default_margin: f64) -> Self {
        Self {
            overrides: Vec::new(),
            default_margin,
        }
    }

    /// Add configured per-model limits; these win over built-in entries.
    pub fn with_overrides(mut self, overrides: Vec<ModelLimit>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn limit_for(&self, model_id: &str) -> ModelLimit {
        let wanted = model_id.trim();

        if let Some(found) = self
            .overrides
            .iter()
            .find(|m| m.model_id == wanted)
            .or_else(|| {
                self.overrides
                    .iter()
                    .find(|m| m.model_id.eq_ignore_ascii_case(wanted))
            })
        {
            return found.clone();
        }

        let lower = wanted.to_lowercase();

        if let Some((id, _, limit)) = KNOWN_MODELS.iter().find(|(id, _, _)| *id == lower) {
            return ModelLimit::new(id, *limit, self.default_margin);
        }

        if let Some((id, limit)) = self.partial_match(&lower) {
            tracing::debug!(model = wanted, resolved = id, "Resolved model by family name");
            return ModelLimit::new(wanted, limit, self.default_margin);
        }

        tracing::warn!(
            model = wanted,
            limit = DEFAULT_INPUT_TOKEN_LIMIT,
            "Unknown model; using conservative default input limit"
        );
        ModelLimit::new(wanted, DEFAULT_INPUT_TOKEN_LIMIT, self.default_margin)
    }

    /// Family match: the longest family contained in the id wins; otherwise,
    /// when the id is a fragment of known ids, the smallest of their limits.
    fn partial_match(&self, lower: &str) -> Option<(&'static str, usize)> {
        if lower.is_empty() {
            return None;
        }

        let by_family = KNOWN_MODELS
            .iter()
            .filter(|(_, family, _)| lower.contains(family))
            .max_by_key(|(_, family, _)| family.len());
        if let Some((id, _, limit)) = by_family {
            return Some((id, *limit));
        }

        KNOWN_MODELS
            .iter()
            .filter(|(id, _, _)| id.contains(lower))
            .min_by_key(|(_, _, limit)| *limit)
            .map(|(id, _, limit)| (*id, *limit))
    }

    /// All built-in and overridden entries, for `mend limits`.
    pub fn entries(&self) -> Vec<ModelLimit> {
        let mut all = self.overrides.clone();
        for (id, _, limit) in KNOWN_MODELS {
            if !all.iter().any(|m| m.model_id == *id) {
                all.push(ModelLimit::new(id, *limit, self.default_margin));
            }
        }
        all
    }
}

/// Parse a safety margin given as a percentage (`"95%"`) or a fraction (`"0.95"`).
pub fn parse_safety_margin(s: &str) -> Result<f64> {
    let s = s.trim();

    if s.is_empty() {
        anyhow::bail!("Safety margin cannot be empty");
    }

    let fraction = if let Some(num_str) = s.strip_suffix('%') {
        let pct: f64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid percentage in safety margin: {}", s))?;
        pct / 100.0
    } else {
        s.parse()
            .with_context(|| format!("Invalid safety margin: {}", s))?
    };

    if !(fraction > 0.0 && fraction <= 1.0) {
        anyhow::bail!(
            "Safety margin must be greater than 0 and at most 100%, got {}",
            s
        );
    }

    Ok(fraction)
}
