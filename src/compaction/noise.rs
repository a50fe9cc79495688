//! Boilerplate that carries no diagnostic value.

use regex::Regex;
use std::sync::LazyLock;

static NOISE_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"[=_\-~*]{5,}.*",                                    // separator rules and banners
        r"|platform \S+ -- Python .*",                        // pytest session header
        r"|(?:rootdir|configfile|cachedir|plugins|collected|collecting)\b.*",
        r"|(?:Test Suites|Tests|Snapshots|Time|Ran all test suites)\b.*",
        r"|test result: .*",                                  // cargo summary
        r"|running \d+ tests?",
        r"|=== (?:RUN|PAUSE|CONT)\b.*",                       // go progress
        r"|(?:PASS|ok)\s*(?:\S+\s+[\d.]+s)?",
        r"|Determining test suites to run.*",
        r"|> .*",                                             // npm script echo
        r"|\S+\.py [.FEsxX]+\s*(?:\[\s*\d+%\])?",             // pytest progress dots
        r")$"
    ))
    .unwrap()
});

static INTERNAL_FRAME_MARKERS: &[&str] = &[
    "node:internal",
    "internal/process",
    "node_modules/jest-",
    "node_modules/@jest/",
    "node_modules/mocha/",
    "_pytest/",
    "pluggy/",
    "/unittest/case.py",
    "rustc/",
    "/library/core/",
    "/library/std/",
    "testing/testing.go",
];

/// True for runner banners, separators and summary counters.
pub fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || NOISE_LINE_REGEX.is_match(trimmed)
}

/// True for frames inside the test runner or language runtime.
pub fn is_internal_frame(frame: &str) -> bool {
    INTERNAL_FRAME_MARKERS.iter().any(|m| frame.contains(m))
}

/// Drop runner-internal frames, keeping the first and last frame regardless.
pub fn filter_frames(frames: &[String]) -> Vec<String> {
    let last = frames.len().saturating_sub(1);
    frames
        .iter()
        .enumerate()
        .filter(|(i, f)| *i == 0 || *i == last || !is_internal_frame(f))
        .map(|(_, f)| f.clone())
        .collect()
}

/// Drop noise lines from free-form output.
pub fn filter_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !is_noise_line(l)).collect()
}
