//! The compression pipeline: dedup, filter, truncate, escalate.

use super::config::CompressionSettings;
use super::noise::{filter_frames, filter_lines};
use super::signature::{dedup_key, digest};
use super::stack::truncate_frames;
use crate::parser::{FailureStatus, ParsedReport, TestFailure};
use crate::tokens::TokenCounter;
use crate::util::truncate_chars;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Names listed in the omission footer before it switches to a count.
const MAX_LISTED_OMISSIONS: usize = 20;

/// How far the compressor had to go to meet the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Stacks cut to the configured window.
    Standard,
    /// Stacks cut to the aggressive window.
    Reduced,
    /// One frame kept at each end.
    Minimal,
    /// Frames dropped, messages clipped.
    MessageOnly,
    /// Low-priority failures omitted.
    Dropped,
    /// Compression would have grown the text, so the raw output (or the full
    /// rendering when no raw output is attached) is used.
    Passthrough,
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompressionLevel::Standard => "standard",
            CompressionLevel::Reduced => "reduced",
            CompressionLevel::Minimal => "minimal",
            CompressionLevel::MessageOnly => "message-only",
            CompressionLevel::Dropped => "dropped",
            CompressionLevel::Passthrough => "passthrough",
        };
        write!(f, "{}", name)
    }
}

/// The result of compressing one [`ParsedReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedReport {
    pub failures: Vec<TestFailure>,
    pub original_token_estimate: usize,
    /// Token count of `rendered`. Never exceeds `original_token_estimate`.
    pub compressed_token_estimate: usize,
    /// Raw failures left out of `rendered` entirely.
    pub omitted_count: usize,
    pub omitted_tests: Vec<String>,
    pub level: CompressionLevel,
    pub remainder_excerpt: Option<String>,
    /// The text placed into the prompt.
    pub rendered: String,
}

impl CompressedReport {
    /// Fraction of the original estimate saved, in `[0, 1]`.
    pub fn reduction(&self) -> f64 {
        if self.original_token_estimate == 0 {
            return 0.0;
        }
        1.0 - self.compressed_token_estimate as f64 / self.original_token_estimate as f64
    }

    /// Raw failures represented, counting duplicates.
    pub fn represented_count(&self) -> usize {
        self.failures.iter().map(|f| f.duplicate_count).sum()
    }
}

/// Shrinks parsed reports to fit a token budget.
#[derive(Debug, Clone, Default)]
pub struct Compressor {
    counter: TokenCounter,
    settings: CompressionSettings,
}

impl Compressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self {
            counter: TokenCounter::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &CompressionSettings {
        &self.settings
    }

    /// Compress `parsed` so that its rendering fits `target_budget` tokens if
    /// the settings allow it.
    ///
    /// The standard profile stops at one frame per stack end; callers check
    /// the result against the budget. The lossy profile continues with
    /// message-only rendering and then omits failures, keeping at least one.
    pub fn compress(&self, parsed: &ParsedReport, target_budget: usize) -> CompressedReport {
        let full_text = match &parsed.raw_output {
            Some(raw) => raw.clone(),
            None => render_full(parsed),
        };
        let original = self.counter.count(&full_text);

        let deduped: Vec<TestFailure> = dedup(&parsed.failures)
            .into_iter()
            .map(|mut f| {
                f.stack_frames = filter_frames(&f.stack_frames);
                f
            })
            .collect();
        let remainder = if deduped.is_empty() {
            parsed.unparsed_remainder.as_deref()
        } else {
            None
        };

        let mut last = None;
        for (i, k) in self.settings.windows().into_iter().enumerate() {
            let level = match i {
                0 => CompressionLevel::Standard,
                1 => CompressionLevel::Reduced,
                _ => CompressionLevel::Minimal,
            };
            let failures = deduped
                .iter()
                .map(|f| {
                    let mut f = f.clone();
                    f.stack_frames = truncate_frames(&f.stack_frames, k);
                    f
                })
                .collect();
            let excerpt = remainder.map(|r| remainder_excerpt(r, level));
            let candidate = self.build(failures, Vec::new(), 0, excerpt, level, original);
            if candidate.compressed_token_estimate <= target_budget {
                return self.finish(candidate, parsed, full_text, original);
            }
            last = Some(candidate);
        }

        if !self.settings.allow_lossy
            && let Some(candidate) = last
        {
            return self.finish(candidate, parsed, full_text, original);
        }

        let message_only: Vec<TestFailure> = deduped
            .iter()
            .map(|f| {
                let mut f = f.clone();
                f.stack_frames.clear();
                f.message = truncate_chars(&f.message, self.settings.message_max_chars);
                f
            })
            .collect();
        let excerpt = remainder.map(|r| remainder_excerpt(r, CompressionLevel::MessageOnly));
        let candidate = self.build(
            message_only.clone(),
            Vec::new(),
            0,
            excerpt,
            CompressionLevel::MessageOnly,
            original,
        );
        if candidate.compressed_token_estimate <= target_budget || message_only.len() <= 1 {
            return self.finish(candidate, parsed, full_text, original);
        }

        let dropped = self.drop_until_fits(&message_only, candidate, target_budget, original);
        self.finish(dropped, parsed, full_text, original)
    }

    /// Omit failures lowest priority first until the rendering fits or one remains.
    fn drop_until_fits(
        &self,
        failures: &[TestFailure],
        message_only: CompressedReport,
        budget: usize,
        original: usize,
    ) -> CompressedReport {
        let mut order: Vec<usize> = (0..failures.len()).collect();
        order.sort_by_key(|&i| {
            (
                status_rank(failures[i].status),
                Reverse(failures[i].duplicate_count),
                i,
            )
        });

        let costs: Vec<usize> = failures
            .iter()
            .enumerate()
            .map(|(i, f)| self.counter.count(&render_failure(i + 1, f)))
            .collect();
        let fixed = message_only
            .compressed_token_estimate
            .saturating_sub(costs.iter().sum());

        // Cheap estimate first, then confirm against the real rendering.
        let mut keep = failures.len();
        let mut kept_cost: usize = costs.iter().sum();
        while keep > 1 {
            let footer = self.counter.count(&omission_footer(
                &names_of(failures, &order[keep..]),
                count_of(failures, &order[keep..]),
            ));
            if fixed + kept_cost + footer <= budget {
                break;
            }
            keep -= 1;
            kept_cost -= costs[order[keep]];
        }

        loop {
            let mut kept_idx = order[..keep].to_vec();
            kept_idx.sort_unstable();
            let mut dropped_idx = order[keep..].to_vec();
            dropped_idx.sort_unstable();

            let kept = kept_idx.iter().map(|&i| failures[i].clone()).collect();
            let candidate = self.build(
                kept,
                names_of(failures, &dropped_idx),
                count_of(failures, &dropped_idx),
                None,
                CompressionLevel::Dropped,
                original,
            );
            if candidate.compressed_token_estimate <= budget || keep <= 1 {
                return candidate;
            }
            keep -= 1;
        }
    }

    fn build(
        &self,
        failures: Vec<TestFailure>,
        omitted_tests: Vec<String>,
        omitted_count: usize,
        remainder_excerpt: Option<String>,
        level: CompressionLevel,
        original: usize,
    ) -> CompressedReport {
        let rendered = render(&failures, &omitted_tests, omitted_count, remainder_excerpt.as_deref());
        CompressedReport {
            compressed_token_estimate: self.counter.count(&rendered),
            failures,
            original_token_estimate: original,
            omitted_count,
            omitted_tests,
            level,
            remainder_excerpt,
            rendered,
        }
    }

    fn finish(
        &self,
        candidate: CompressedReport,
        parsed: &ParsedReport,
        full_text: String,
        original: usize,
    ) -> CompressedReport {
        let report = if candidate.compressed_token_estimate > original {
            CompressedReport {
                failures: parsed.failures.clone(),
                original_token_estimate: original,
                compressed_token_estimate: original,
                omitted_count: 0,
                omitted_tests: Vec::new(),
                level: CompressionLevel::Passthrough,
                remainder_excerpt: parsed.unparsed_remainder.clone(),
                rendered: full_text,
            }
        } else {
            candidate
        };

        tracing::debug!(
            original = report.original_token_estimate,
            compressed = report.compressed_token_estimate,
            level = %report.level,
            omitted = report.omitted_count,
            "Compressed test report"
        );
        if report.omitted_count > 0 {
            tracing::warn!(
                omitted = report.omitted_count,
                "Failures omitted from the prompt to fit the token budget"
            );
        }
        report
    }
}

/// Group failures by dedup key. The first occurrence is kept and carries the
/// group's total `duplicate_count`.
pub fn dedup(failures: &[TestFailure]) -> Vec<TestFailure> {
    let mut groups: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<TestFailure> = Vec::new();

    for failure in failures {
        let key = dedup_key(failure);
        match groups.get(&key) {
            Some(&idx) => out[idx].duplicate_count += failure.duplicate_count,
            None => {
                let mut first = failure.clone();
                first.signature = Some(digest(&key));
                groups.insert(key, out.len());
                out.push(first);
            }
        }
    }
    out
}

fn status_rank(status: FailureStatus) -> u8 {
    match status {
        FailureStatus::Error => 0,
        FailureStatus::Failed => 1,
        FailureStatus::Timeout => 2,
    }
}

fn names_of(failures: &[TestFailure], idx: &[usize]) -> Vec<String> {
    idx.iter().map(|&i| failures[i].qualified_name()).collect()
}

fn count_of(failures: &[TestFailure], idx: &[usize]) -> usize {
    idx.iter().map(|&i| failures[i].duplicate_count).sum()
}

fn remainder_excerpt(remainder: &str, level: CompressionLevel) -> String {
    let tail = match level {
        CompressionLevel::Standard => 80,
        CompressionLevel::Reduced => 40,
        CompressionLevel::Minimal => 20,
        _ => 10,
    };
    let lines = filter_lines(remainder);
    let start = lines.len().saturating_sub(tail);
    lines[start..].join("\n")
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

fn render_failure(index: usize, failure: &TestFailure) -> String {
    let mut out = format!(
        "[{}] {} {}",
        index,
        failure.status.to_string().to_uppercase(),
        failure.qualified_name()
    );
    if failure.duplicate_count > 1 {
        out.push_str(&format!(" (repeated {}×)", failure.duplicate_count));
    }
    if !failure.message.is_empty() {
        out.push('\n');
        out.push_str(&failure.message);
    }
    for frame in &failure.stack_frames {
        out.push_str("\n  ");
        out.push_str(frame);
    }
    out
}

fn omission_footer(names: &[String], count: usize) -> String {
    let mut footer = format!(
        "{} omitted to fit the token budget: ",
        plural(count, "more failing test")
    );
    let listed: Vec<&str> = names
        .iter()
        .take(MAX_LISTED_OMISSIONS)
        .map(String::as_str)
        .collect();
    footer.push_str(&listed.join(", "));
    if names.len() > MAX_LISTED_OMISSIONS {
        footer.push_str(&format!(" and {} more", names.len() - MAX_LISTED_OMISSIONS));
    }
    footer
}

fn render(
    failures: &[TestFailure],
    omitted_tests: &[String],
    omitted_count: usize,
    remainder_excerpt: Option<&str>,
) -> String {
    let mut sections = Vec::new();

    if !failures.is_empty() {
        let total: usize = failures.iter().map(|f| f.duplicate_count).sum::<usize>() + omitted_count;
        let mut header = plural(total, "failing test");
        if failures.len() + omitted_tests.len() < total {
            header.push_str(&format!(
                " ({} distinct)",
                failures.len() + omitted_tests.len()
            ));
        }
        sections.push(header);
        for (i, failure) in failures.iter().enumerate() {
            sections.push(render_failure(i + 1, failure));
        }
    }

    if !omitted_tests.is_empty() {
        sections.push(omission_footer(omitted_tests, omitted_count));
    }

    match remainder_excerpt {
        Some(excerpt) if failures.is_empty() => sections.push(format!(
            "No individual test failures were recognized. End of test output:\n{}",
            excerpt
        )),
        _ if failures.is_empty() => sections.push("No failing tests were recognized.".to_string()),
        _ => {}
    }

    sections.join("\n\n")
}

/// Everything in the parsed report, uncompressed. The baseline for savings
/// when the report carries no raw output.
fn render_full(parsed: &ParsedReport) -> String {
    let mut sections = Vec::new();
    if !parsed.failures.is_empty() {
        sections.push(plural(parsed.failures.len(), "failing test"));
        for (i, failure) in parsed.failures.iter().enumerate() {
            sections.push(render_failure(i + 1, failure));
        }
    }
    if let Some(remainder) = &parsed.unparsed_remainder {
        sections.push(remainder.clone());
    }
    sections.join("\n\n")
}
