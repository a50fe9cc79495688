//! Jest `--json` reports.

use super::types::{FailureStatus, Framework, ParsedReport, TestFailure, split_js_stack};
use super::{ReportParser, load_json};
use crate::errors::ParseError;
use crate::util::strip_ansi;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    test_results: Vec<JestSuite>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestSuite {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    assertion_results: Vec<JestAssertion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestAssertion {
    #[serde(default)]
    ancestor_titles: Vec<String>,
    title: String,
    #[serde(default)]
    full_name: Option<String>,
    status: String,
    #[serde(default)]
    failure_messages: Vec<String>,
}

impl JestAssertion {
    fn display_name(&self) -> String {
        if !self.ancestor_titles.is_empty() {
            let mut parts = self.ancestor_titles.clone();
            parts.push(self.title.clone());
            parts.join(" › ")
        } else {
            self.full_name.clone().unwrap_or_else(|| self.title.clone())
        }
    }
}

/// Name given to a suite that failed before any test ran (syntax error, bad import).
pub const SUITE_FAILURE_NAME: &str = "Test suite failed to run";

/// Parses the report written by `jest --json`.
pub struct JestJsonParser;

impl ReportParser for JestJsonParser {
    fn name(&self) -> &'static str {
        "jest-json"
    }

    fn parse(&self, raw: &str) -> Result<ParsedReport, ParseError> {
        let value = load_json(raw)?;
        if value.get("testResults").is_none() {
            return Err(ParseError::SchemaMismatch {
                format: "jest",
                reason: "missing testResults".to_string(),
            });
        }
        let report: JestReport =
            serde_json::from_value(value).map_err(|e| ParseError::SchemaMismatch {
                format: "jest",
                reason: e.to_string(),
            })?;

        let mut failures = Vec::new();

        for suite in &report.test_results {
            let before = failures.len();

            for assertion in &suite.assertion_results {
                let Some(status) = FailureStatus::from_status_word(&assertion.status) else {
                    continue;
                };
                let blob = strip_ansi(&assertion.failure_messages.join("\n"));
                let (message, frames) = split_js_stack(&blob);
                let status = status.refine(&message);
                failures.push(
                    TestFailure::new(&assertion.display_name(), &suite.name, status, &message)
                        .with_frames(frames),
                );
            }

            let suite_failed = FailureStatus::from_status_word(&suite.status).is_some();
            if suite_failed && failures.len() == before && !suite.message.trim().is_empty() {
                let (message, frames) = split_js_stack(&strip_ansi(&suite.message));
                failures.push(
                    TestFailure::new(SUITE_FAILURE_NAME, &suite.name, FailureStatus::Error, &message)
                        .with_frames(frames),
                );
            }
        }

        Ok(ParsedReport::new(failures, None, Framework::Jest))
    }
}
