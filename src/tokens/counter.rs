//! Approximate token counting.

use super::ModelLimit;

/// Deterministic, tokenizer-free token estimate.
///
/// Runs of ASCII word characters cost one token per four characters, each ASCII
/// punctuation mark costs one token, whitespace runs longer than a single
/// character cost one token per four characters, and every non-ASCII character
/// costs one token. This overestimates typical BPE tokenizers on prose and is
/// close on code and stack traces, which is the direction we want for a budget
/// check.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

#[derive(Clone, Copy, PartialEq)]
enum Class {
    Word,
    Space,
    Other,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Estimate the token cost of `text`. Linear in the input length.
    pub fn count(&self, text: &str) -> usize {
        let mut tokens = 0usize;
        let mut run_class = Class::Other;
        let mut run_len = 0usize;

        let flush = |class: Class, len: usize| -> usize {
            match class {
                Class::Word => len.div_ceil(4),
                Class::Space if len > 1 => len.div_ceil(4),
                _ => 0,
            }
        };

        for ch in text.chars() {
            let class = if ch.is_ascii_alphanumeric() || ch == '_' {
                Class::Word
            } else if ch.is_ascii_whitespace() {
                Class::Space
            } else {
                Class::Other
            };

            if class != run_class {
                tokens += flush(run_class, run_len);
                run_class = class;
                run_len = 0;
            }

            if class == Class::Other {
                // ASCII punctuation and every non-ASCII character stand alone.
                tokens += 1;
            } else {
                run_len += 1;
            }
        }

        tokens + flush(run_class, run_len)
    }

    /// The largest prompt size that may be sent to a model with this limit.
    pub fn safe_limit(&self, limit: &ModelLimit) -> usize {
        limit.safe_limit()
    }
}

/// Convenience function to count tokens without constructing a counter.
pub fn count_tokens(text: &str) -> usize {
    TokenCounter.count(text)
}
