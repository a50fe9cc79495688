//! pytest-json-report output (`pytest --json-report`).

use super::types::{FailureStatus, Framework, ParsedReport, TestFailure};
use super::{ReportParser, load_json};
use crate::errors::ParseError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PytestReport {
    tests: Vec<PytestTest>,
    #[serde(default)]
    collectors: Vec<PytestCollector>,
}

#[derive(Debug, Deserialize)]
struct PytestTest {
    nodeid: String,
    outcome: String,
    #[serde(default)]
    setup: Option<PytestStage>,
    #[serde(default)]
    call: Option<PytestStage>,
    #[serde(default)]
    teardown: Option<PytestStage>,
}

#[derive(Debug, Deserialize)]
struct PytestStage {
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    crash: Option<PytestCrash>,
    #[serde(default)]
    traceback: Vec<PytestTraceEntry>,
    #[serde(default)]
    longrepr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PytestCrash {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PytestTraceEntry {
    #[serde(default)]
    path: String,
    #[serde(default)]
    lineno: Option<u64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PytestCollector {
    nodeid: String,
    outcome: String,
    #[serde(default)]
    longrepr: Option<String>,
}

/// Parses reports from the `pytest-json-report` plugin.
pub struct PytestJsonParser;

impl ReportParser for PytestJsonParser {
    fn name(&self) -> &'static str {
        "pytest-json"
    }

    fn parse(&self, raw: &str) -> Result<ParsedReport, ParseError> {
        let value = load_json(raw)?;
        let looks_like_pytest = value
            .get("tests")
            .and_then(|t| t.as_array())
            .is_some_and(|tests| tests.iter().all(|t| t.get("nodeid").is_some()));
        if !looks_like_pytest {
            return Err(ParseError::SchemaMismatch {
                format: "pytest",
                reason: "missing tests[].nodeid".to_string(),
            });
        }
        let report: PytestReport =
            serde_json::from_value(value).map_err(|e| ParseError::SchemaMismatch {
                format: "pytest",
                reason: e.to_string(),
            })?;

        let mut failures = Vec::new();

        for collector in &report.collectors {
            if FailureStatus::from_status_word(&collector.outcome).is_none() {
                continue;
            }
            let longrepr = collector.longrepr.as_deref().unwrap_or_default();
            let (message, frames) = split_longrepr(longrepr);
            failures.push(
                TestFailure::new(&collector.nodeid, &collector.nodeid, FailureStatus::Error, &message)
                    .with_frames(frames),
            );
        }

        for test in &report.tests {
            let Some(outcome_status) = FailureStatus::from_status_word(&test.outcome) else {
                continue;
            };

            let stages = [
                ("setup", test.setup.as_ref()),
                ("call", test.call.as_ref()),
                ("teardown", test.teardown.as_ref()),
            ];
            let failed_stage = stages.iter().find_map(|(name, stage)| {
                stage
                    .filter(|s| FailureStatus::from_status_word(&s.outcome).is_some())
                    .map(|s| (*name, s))
            });

            let (location, test_name) = split_nodeid(&test.nodeid);
            let (status, message, frames) = match failed_stage {
                Some((stage_name, stage)) => {
                    let (message, frames) = stage_details(stage);
                    let status = if stage_name == "call" {
                        outcome_status
                    } else {
                        FailureStatus::Error
                    };
                    (status, message, frames)
                }
                None => (outcome_status, String::new(), Vec::new()),
            };

            let status = status.refine(&message);
            failures.push(TestFailure::new(test_name, location, status, &message).with_frames(frames));
        }

        Ok(ParsedReport::new(failures, None, Framework::Pytest))
    }
}

/// `tests/test_foo.py::TestCls::test_bar` -> (`tests/test_foo.py`, `TestCls::test_bar`).
pub fn split_nodeid(nodeid: &str) -> (&str, &str) {
    match nodeid.split_once("::") {
        Some((location, name)) => (location, name),
        None => ("", nodeid),
    }
}

fn stage_details(stage: &PytestStage) -> (String, Vec<String>) {
    let longrepr = stage.longrepr.as_deref().unwrap_or_default();
    let (repr_message, repr_frames) = split_longrepr(longrepr);

    let message = stage
        .crash
        .as_ref()
        .map(|c| c.message.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or(repr_message);

    let frames: Vec<String> = if stage.traceback.is_empty() {
        repr_frames
    } else {
        stage
            .traceback
            .iter()
            .map(|entry| match entry.lineno {
                Some(line) if entry.message.is_empty() => format!("{}:{}", entry.path, line),
                Some(line) => format!("{}:{}: {}", entry.path, line, entry.message),
                None => entry.path.clone(),
            })
            .collect()
    };

    (message, frames)
}

/// Split pytest's long representation into `E` message lines and the rest.
pub fn split_longrepr(longrepr: &str) -> (String, Vec<String>) {
    let mut message = Vec::new();
    let mut frames = Vec::new();

    for line in longrepr.lines() {
        if let Some(rest) = line.strip_prefix('E') {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                message.push(rest.trim().to_string());
                continue;
            }
        }
        if !line.trim().is_empty() {
            frames.push(line.trim_end().to_string());
        }
    }

    if message.is_empty()
        && let Some(last) = frames.pop()
    {
        message.push(last);
    }

    (message.join("\n").trim().to_string(), frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_FAILURE: &str = r#"{
      "created": 1700000000.0,
      "exitcode": 1,
      "root": "/app",
      "summary": {"failed": 1, "passed": 1, "total": 2},
      "tests": [
        {"nodeid": "tests/test_math.py::test_add", "lineno": 3, "outcome": "passed",
         "setup": {"outcome": "passed"}, "call": {"outcome": "passed"}, "teardown": {"outcome": "passed"}},
        {"nodeid": "tests/test_math.py::test_div", "lineno": 7, "outcome": "failed",
         "setup": {"outcome": "passed"},
         "call": {"outcome": "failed",
                  "crash": {"path": "/app/tests/test_math.py", "lineno": 9, "message": "ZeroDivisionError: division by zero"},
                  "traceback": [{"path": "tests/test_math.py", "lineno": 9, "message": ""},
                                {"path": "app/math.py", "lineno": 2, "message": "ZeroDivisionError"}],
                  "longrepr": "def test_div():\n>       assert div(1, 0) == 0\n\nE       ZeroDivisionError: division by zero"},
         "teardown": {"outcome": "passed"}}
      ]
    }"#;

    #[test]
    fn test_single_failure_fixture() {
        let report = PytestJsonParser.parse(SINGLE_FAILURE).unwrap();
        assert_eq!(report.framework_detected, Framework::Pytest);
        assert_eq!(report.failures.len(), 1);

        let failure = &report.failures[0];
        assert_eq!(failure.test_name, "test_div");
        assert_eq!(failure.location, "tests/test_math.py");
        assert_eq!(failure.message, "ZeroDivisionError: division by zero");
        assert_eq!(
            failure.stack_frames,
            vec![
                "tests/test_math.py:9".to_string(),
                "app/math.py:2: ZeroDivisionError".to_string()
            ]
        );
    }

    #[test]
    fn test_setup_failure_is_error() {
        let raw = r#"{"tests": [{"nodeid": "tests/test_db.py::test_query", "outcome": "error",
            "setup": {"outcome": "failed", "longrepr": "E   ConnectionRefusedError: [Errno 111]"}}]}"#;
        let report = PytestJsonParser.parse(raw).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].status, FailureStatus::Error);
        assert_eq!(
            report.failures[0].message,
            "ConnectionRefusedError: [Errno 111]"
        );
    }

    #[test]
    fn test_collection_error() {
        let raw = r#"{"tests": [], "collectors": [
            {"nodeid": "", "outcome": "passed"},
            {"nodeid": "tests/test_broken.py", "outcome": "failed",
             "longrepr": "ImportError while importing test module '/app/tests/test_broken.py'.\nE   ModuleNotFoundError: No module named 'missing'"}]}"#;
        let report = PytestJsonParser.parse(raw).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].status, FailureStatus::Error);
        assert_eq!(
            report.failures[0].message,
            "ModuleNotFoundError: No module named 'missing'"
        );
    }

    #[test]
    fn test_class_nodeid() {
        assert_eq!(
            split_nodeid("tests/test_x.py::TestCalc::test_add[1-2]"),
            ("tests/test_x.py", "TestCalc::test_add[1-2]")
        );
        assert_eq!(split_nodeid("weird"), ("", "weird"));
    }

    #[test]
    fn test_rejects_jest_schema() {
        let err = PytestJsonParser.parse(r#"{"testResults": []}"#).unwrap_err();
        assert!(matches!(err, ParseError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_split_longrepr_without_e_lines() {
        let (message, frames) = split_longrepr("line one\nFailed: Timeout >5.0s");
        assert_eq!(message, "Failed: Timeout >5.0s");
        assert_eq!(frames, vec!["line one".to_string()]);
    }
}
