//! Plain console output from pytest, Jest, cargo test and go test.
//!
//! A line-oriented state machine: recognized lines open or close a failure
//! block, and the lines in between are attached to the open failure as
//! message or stack frames. Anything outside a block is kept as remainder.

use super::ReportParser;
use super::jest::SUITE_FAILURE_NAME;
use super::types::{FailureStatus, Framework, ParsedReport, TestFailure};
use crate::errors::ParseError;
use crate::util::strip_ansi;
use regex::Regex;
use std::sync::LazyLock;

static PYTEST_SUMMARY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(FAILED|ERROR)\s+(\S+?)::(\S+)(?:\s+-\s+(.*))?$").unwrap()
});

static PYTEST_COLLECT_ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ERROR\s+(\S+\.py)(?:\s+-\s+(.*))?$").unwrap());

static PYTEST_VERBOSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+?)::(\S+)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\b").unwrap()
});

static PYTEST_SECTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,}\s+(.+?)\s+_{3,}$").unwrap());

static CAPTURED_SECTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-{3,}\s+.+\s+-{3,}$").unwrap());

static SEPARATOR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^={3,}").unwrap());

static JEST_SUITE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(PASS|FAIL) +(\S+)").unwrap());

static JEST_BULLET_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^●\s+(.+)$").unwrap());

static FAIL_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[✕✗×]\s+(.+?)(?:\s+\(\d+(?:\.\d+)?\s*m?s\))?$").unwrap());

static PASS_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[✓✔√]\s+").unwrap());

static CARGO_RESULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test\s+(\S+)\s+\.\.\.\s+(FAILED|ok|ignored)\b").unwrap());

static CARGO_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^----\s+(\S+)\s+stdout\s+----$").unwrap());

static GO_RESULT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---\s+(FAIL|PASS|SKIP):\s+(\S+)").unwrap());

static GO_PACKAGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(FAIL|ok)(\s|$)").unwrap());

static EXCEPTION_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][\w.]*(Error|Exception|Failure|Interrupt|Exit)\b(:.*)?$").unwrap()
});

/// Parses human-readable runner output. Never rejects its input.
pub struct ConsoleTextParser;

impl ReportParser for ConsoleTextParser {
    fn name(&self) -> &'static str {
        "console"
    }

    fn parse(&self, raw: &str) -> Result<ParsedReport, ParseError> {
        let cleaned = strip_ansi(raw);
        let mut state = ConsoleState::default();
        for line in cleaned.lines() {
            state.feed(line);
        }
        Ok(state.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Pytest,
    Jest,
    Cargo,
    Go,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    /// Outside any failure block.
    None,
    /// Lines belong to the failure at this index.
    Failure(usize, BlockKind),
    /// A repeated block (Jest's end-of-run summary); swallow its lines.
    Discard,
}

#[derive(Debug)]
struct Draft {
    name: String,
    location: String,
    status: FailureStatus,
    message: Vec<String>,
    frames: Vec<String>,
    block_seen: bool,
}

struct ConsoleState {
    drafts: Vec<Draft>,
    target: Target,
    remainder: Vec<String>,
    framework: Framework,
    jest_suite: String,
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self {
            drafts: Vec::new(),
            target: Target::None,
            remainder: Vec::new(),
            framework: Framework::Unknown,
            jest_suite: String::new(),
        }
    }
}

impl ConsoleState {
    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();

        if let Some(caps) = PYTEST_SUMMARY_REGEX.captures(trimmed) {
            self.detect(Framework::Pytest);
            let status = status_of(&caps[1]);
            let idx = self.upsert(&caps[3], &caps[2], status);
            if let Some(msg) = caps.get(4) {
                let draft = &mut self.drafts[idx];
                if draft.message.is_empty() {
                    draft.message.push(msg.as_str().trim().to_string());
                }
            }
            self.target = Target::None;
            return;
        }

        if let Some(caps) = PYTEST_COLLECT_ERROR_REGEX.captures(trimmed) {
            self.detect(Framework::Pytest);
            let idx = self.upsert(&caps[1], &caps[1], FailureStatus::Error);
            if let Some(msg) = caps.get(2) {
                let draft = &mut self.drafts[idx];
                if draft.message.is_empty() {
                    draft.message.push(msg.as_str().trim().to_string());
                }
            }
            self.target = Target::None;
            return;
        }

        if let Some(caps) = PYTEST_VERBOSE_REGEX.captures(trimmed) {
            self.detect(Framework::Pytest);
            self.target = match FailureStatus::from_status_word(&caps[3]) {
                Some(status) => {
                    let idx = self.upsert(&caps[2], &caps[1], status);
                    Target::Failure(idx, BlockKind::Pytest)
                }
                None => Target::None,
            };
            return;
        }

        if let Some(caps) = PYTEST_SECTION_REGEX.captures(trimmed) {
            self.detect(Framework::Pytest);
            let title = caps[1].trim();
            let (name, status) = match title
                .strip_prefix("ERROR at setup of ")
                .or_else(|| title.strip_prefix("ERROR at teardown of "))
                .or_else(|| title.strip_prefix("ERROR collecting "))
            {
                Some(rest) => (rest.trim(), FailureStatus::Error),
                None => (title, FailureStatus::Failed),
            };
            self.open_block(name, "", status, BlockKind::Pytest);
            return;
        }

        if let Some(caps) = CARGO_BLOCK_REGEX.captures(trimmed) {
            self.detect(Framework::Cargo);
            self.open_block(&caps[1], "", FailureStatus::Failed, BlockKind::Cargo);
            return;
        }

        if let Some(caps) = GO_RESULT_REGEX.captures(trimmed) {
            self.detect(Framework::Go);
            self.target = if &caps[1] == "FAIL" {
                let idx = self.upsert(&caps[2], "", FailureStatus::Failed);
                Target::Failure(idx, BlockKind::Go)
            } else {
                Target::None
            };
            return;
        }

        if CAPTURED_SECTION_REGEX.is_match(trimmed) {
            // "---- Captured stdout call ----" stays inside the current block.
            if matches!(self.target, Target::None) {
                self.remainder.push(line.to_string());
            }
            return;
        }

        if SEPARATOR_REGEX.is_match(trimmed) {
            self.target = Target::None;
            self.remainder.push(line.to_string());
            return;
        }

        if let Some(caps) = JEST_SUITE_REGEX.captures(trimmed) {
            self.detect(Framework::Jest);
            self.jest_suite = caps[2].to_string();
            self.target = Target::None;
            return;
        }

        if let Some(caps) = JEST_BULLET_REGEX.captures(trimmed) {
            let name = caps[1].trim();
            if name == "Console" {
                self.target = Target::Discard;
                return;
            }
            self.detect(Framework::Jest);
            let status = if name == SUITE_FAILURE_NAME {
                FailureStatus::Error
            } else {
                FailureStatus::Failed
            };
            let suite = self.jest_suite.clone();
            self.open_block(name, &suite, status, BlockKind::Jest);
            return;
        }

        if let Some(caps) = FAIL_MARKER_REGEX.captures(trimmed) {
            self.detect(Framework::Jest);
            let suite = self.jest_suite.clone();
            self.upsert(&caps[1], &suite, FailureStatus::Failed);
            self.target = Target::None;
            return;
        }

        if PASS_MARKER_REGEX.is_match(trimmed) {
            self.target = Target::None;
            return;
        }

        if let Some(caps) = CARGO_RESULT_REGEX.captures(trimmed) {
            self.detect(Framework::Cargo);
            if &caps[2] == "FAILED" {
                self.upsert(&caps[1], "", FailureStatus::Failed);
            }
            self.target = Target::None;
            return;
        }

        if trimmed == "failures:" || GO_PACKAGE_REGEX.is_match(trimmed) {
            self.target = Target::None;
            self.remainder.push(line.to_string());
            return;
        }

        match self.target {
            Target::Failure(idx, kind) => self.attach(idx, kind, trimmed),
            Target::Discard => {}
            Target::None => self.remainder.push(line.to_string()),
        }
    }

    fn detect(&mut self, framework: Framework) {
        if self.framework == Framework::Unknown {
            self.framework = framework;
        }
    }

    /// Start a block for `name`. A block for a failure that already has one is
    /// a repeat: Jest repeats blocks in its summary, so those are discarded,
    /// while other runners get a fresh record.
    fn open_block(&mut self, name: &str, location: &str, status: FailureStatus, kind: BlockKind) {
        let idx = match self.find(name, location, true) {
            Some(idx) => idx,
            None if kind == BlockKind::Jest && self.find(name, location, false).is_some() => {
                self.target = Target::Discard;
                return;
            }
            None => self.push_draft(name, location, status),
        };
        self.merge_into(idx, name, location, status);
        self.drafts[idx].block_seen = true;
        self.target = Target::Failure(idx, kind);
    }

    /// Find a matching failure or create one.
    fn upsert(&mut self, name: &str, location: &str, status: FailureStatus) -> usize {
        match self.find(name, location, false) {
            Some(idx) => {
                self.merge_into(idx, name, location, status);
                idx
            }
            None => self.push_draft(name, location, status),
        }
    }

    fn find(&self, name: &str, location: &str, without_block: bool) -> Option<usize> {
        self.drafts.iter().position(|d| {
            (!without_block || !d.block_seen)
                && names_match(&d.name, name)
                && (d.location.is_empty() || location.is_empty() || d.location == location)
        })
    }

    fn push_draft(&mut self, name: &str, location: &str, status: FailureStatus) -> usize {
        self.drafts.push(Draft {
            name: name.to_string(),
            location: location.to_string(),
            status,
            message: Vec::new(),
            frames: Vec::new(),
            block_seen: false,
        });
        self.drafts.len() - 1
    }

    fn merge_into(&mut self, idx: usize, name: &str, location: &str, status: FailureStatus) {
        let draft = &mut self.drafts[idx];
        if draft.location.is_empty() && !location.is_empty() {
            draft.location = location.to_string();
        }
        // Jest bullets carry the describe path; markers only the title.
        if name.len() > draft.name.len() && name.ends_with(draft.name.as_str()) {
            draft.name = name.to_string();
        }
        if draft.status == FailureStatus::Failed && status != FailureStatus::Failed {
            draft.status = status;
        }
    }

    fn attach(&mut self, idx: usize, kind: BlockKind, trimmed: &str) {
        if trimmed.is_empty() {
            return;
        }
        let draft = &mut self.drafts[idx];

        match kind {
            BlockKind::Pytest => {
                if trimmed == "E" {
                    return;
                }
                match trimmed.strip_prefix("E ") {
                    Some(msg) => draft.message.push(msg.trim().to_string()),
                    None => draft.frames.push(trimmed.to_string()),
                }
            }
            BlockKind::Jest => {
                if trimmed.starts_with("at ") || !draft.frames.is_empty() {
                    draft.frames.push(trimmed.to_string());
                } else {
                    draft.message.push(trimmed.to_string());
                }
            }
            BlockKind::Cargo => {
                if trimmed.starts_with("note:") {
                    return;
                }
                if trimmed.contains("panicked at") || trimmed.starts_with("at ") {
                    draft.frames.push(trimmed.to_string());
                } else {
                    draft.message.push(trimmed.to_string());
                }
            }
            BlockKind::Go => {
                if trimmed.starts_with("panic:") || (draft.frames.is_empty() && !is_go_frame(trimmed)) {
                    draft.message.push(trimmed.to_string());
                } else {
                    draft.frames.push(trimmed.to_string());
                }
            }
        }
    }

    fn finish(self) -> ParsedReport {
        let failures = self
            .drafts
            .into_iter()
            .map(|mut draft| {
                if draft.message.is_empty()
                    && let Some(pos) = draft
                        .frames
                        .iter()
                        .rposition(|f| EXCEPTION_LINE_REGEX.is_match(f))
                {
                    let line = draft.frames.remove(pos);
                    draft.message.push(line);
                }
                let message = draft.message.join("\n");
                let status = draft.status.refine(&message);
                TestFailure::new(&draft.name, &draft.location, status, &message)
                    .with_frames(draft.frames)
            })
            .collect();

        let remainder = (!self.remainder.is_empty()).then(|| self.remainder.join("\n"));
        ParsedReport::new(failures, remainder, self.framework)
    }
}

fn status_of(word: &str) -> FailureStatus {
    FailureStatus::from_status_word(word).unwrap_or(FailureStatus::Failed)
}

fn is_go_frame(line: &str) -> bool {
    line.starts_with("goroutine ")
        || (line.ends_with(')') && line.contains('(') && !line.contains(' '))
}

/// Same test under different spellings: `A.b` vs `A::b`, or a Jest title
/// against its `describe › title` form.
fn names_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let norm = |s: &str| s.replace('.', "::");
    if norm(a) == norm(b) {
        return true;
    }
    a.ends_with(&format!(" › {}", b)) || b.ends_with(&format!(" › {}", a))
}
