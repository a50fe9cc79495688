//! Dedup signatures.
//!
//! Two failures share a signature when their first message line and raising
//! frame are the same once volatile details are erased: directories,
//! line/column numbers, timestamps, hex addresses and durations.

use crate::parser::TestFailure;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?").unwrap()
});

static HEX_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());

static DIRECTORY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[A-Za-z]:)?(?:[\w.\-~@]*[/\\])+").unwrap());

static LINE_COL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\.[A-Za-z]\w*):\d+(?::\d+)?").unwrap());

static LINE_WORD_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bline \d+").unwrap());

static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\s?(?:ms|µs|us|ns|s|sec|secs|seconds)\b").unwrap());

static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Erase the volatile parts of one line.
pub fn normalize_line(line: &str) -> String {
    let s = TIMESTAMP_REGEX.replace_all(line, "<ts>");
    let s = HEX_REGEX.replace_all(&s, "0x?");
    let s = DIRECTORY_REGEX.replace_all(&s, "");
    let s = LINE_COL_REGEX.replace_all(&s, "$1");
    let s = LINE_WORD_REGEX.replace_all(&s, "line N");
    let s = DURATION_REGEX.replace_all(&s, "<dur>");
    WHITESPACE_REGEX.replace_all(s.trim(), " ").into_owned()
}

/// The frame that raised: the first for `at ...` style stacks, the last otherwise.
pub fn raising_frame(frames: &[String]) -> Option<&str> {
    let first = frames.first()?;
    if first.starts_with("at ") {
        Some(first)
    } else {
        frames.last().map(String::as_str)
    }
}

/// The dedup key for a failure.
pub fn dedup_key(failure: &TestFailure) -> String {
    let first_line = failure.message.lines().next().unwrap_or_default();
    let frame = raising_frame(&failure.stack_frames).unwrap_or_default();
    format!(
        "{}\u{1f}{}\u{1f}{}",
        failure.status,
        normalize_line(first_line),
        normalize_line(frame)
    )
}

/// Short digest of a dedup key, for display and audit grouping.
pub fn digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)[..12].to_string()
}
