//! Best-effort extraction from arbitrary JSON test reports.
//!
//! Walks the document looking for arrays of objects whose keys look like test
//! records. Nested records win over their parents so a suite object that
//! merely aggregates its children does not produce a second failure.

use super::types::{FailureStatus, Framework, ParsedReport, TestFailure, split_js_stack};
use super::{ReportParser, load_json};
use crate::errors::ParseError;
use crate::util::strip_ansi;
use serde_json::{Map, Value};

const NAME_KEYS: &[&str] = &["name", "title", "test", "testName", "test_name", "fullName"];
const STATUS_KEYS: &[&str] = &["status", "result", "outcome", "state"];
const MESSAGE_KEYS: &[&str] = &[
    "message",
    "error",
    "failure",
    "reason",
    "errorMessage",
    "error_message",
    "failureMessage",
    "failureMessages",
];
const STACK_KEYS: &[&str] = &["stack", "stacktrace", "stackTrace", "traceback", "trace"];
const LOCATION_KEYS: &[&str] = &["file", "location", "path", "filename", "classname", "suite"];

/// Parses any JSON document containing recognizable test records.
pub struct GenericJsonParser;

impl ReportParser for GenericJsonParser {
    fn name(&self) -> &'static str {
        "generic-json"
    }

    fn parse(&self, raw: &str) -> Result<ParsedReport, ParseError> {
        let value = load_json(raw)?;
        let mut walk = Walk::default();
        walk.visit(&value, "");

        if !walk.saw_record {
            return Err(ParseError::NoRecords);
        }

        Ok(ParsedReport::new(walk.failures, None, Framework::Generic))
    }
}

#[derive(Default)]
struct Walk {
    failures: Vec<TestFailure>,
    /// Any test-shaped object, passing or not. A report of only passing tests
    /// is still a successful parse.
    saw_record: bool,
}

impl Walk {
    /// Visit `value`; returns true when a record was found at or below it.
    fn visit(&mut self, value: &Value, inherited_location: &str) -> bool {
        match value {
            Value::Array(items) => {
                let mut found = false;
                for item in items {
                    found |= self.visit(item, inherited_location);
                }
                found
            }
            Value::Object(obj) => {
                let own_location = first_string(obj, LOCATION_KEYS);
                let child_location = own_location
                    .clone()
                    .or_else(|| first_string(obj, NAME_KEYS).filter(|_| has_nested_records(obj)))
                    .unwrap_or_else(|| inherited_location.to_string());

                let mut found_below = false;
                for (_, child) in obj.iter() {
                    if matches!(child, Value::Array(_) | Value::Object(_)) {
                        found_below |= self.visit(child, &child_location);
                    }
                }
                if found_below {
                    return true;
                }

                match classify(obj) {
                    Some(record) => {
                        self.saw_record = true;
                        if let Some(status) = record {
                            let location = own_location.unwrap_or_else(|| inherited_location.to_string());
                            self.push(obj, status, &location);
                        }
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn push(&mut self, obj: &Map<String, Value>, status: FailureStatus, location: &str) {
        let Some(name) = first_string(obj, NAME_KEYS) else {
            return;
        };
        let raw_message = MESSAGE_KEYS
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(message_text)
            .unwrap_or_default();
        let raw_message = strip_ansi(&raw_message);

        let explicit_stack: Option<Vec<String>> = STACK_KEYS
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(stack_lines);

        let (message, frames) = match explicit_stack {
            Some(frames) => (raw_message.trim().to_string(), frames),
            None => split_js_stack(&raw_message),
        };

        let status = status.refine(&message);
        self.failures
            .push(TestFailure::new(&name, location, status, &message).with_frames(frames));
    }
}

/// `None` = not a test record; `Some(None)` = a non-failing record;
/// `Some(Some(status))` = a failing record.
fn classify(obj: &Map<String, Value>) -> Option<Option<FailureStatus>> {
    first_string(obj, NAME_KEYS)?;

    let status_value = STATUS_KEYS.iter().find_map(|k| obj.get(*k));
    let has_error = MESSAGE_KEYS
        .iter()
        .filter(|k| **k != "message")
        .filter_map(|k| obj.get(*k))
        .any(|v| message_text(v).is_some_and(|m| !m.trim().is_empty()));

    match status_value {
        Some(Value::String(word)) => {
            if let Some(status) = FailureStatus::from_status_word(word) {
                Some(Some(status))
            } else if FailureStatus::is_non_failure_word(word) {
                Some(None)
            } else if has_error {
                Some(Some(FailureStatus::Failed))
            } else {
                None
            }
        }
        Some(Value::Bool(passed)) => Some((!passed).then_some(FailureStatus::Failed)),
        _ if has_error => Some(Some(FailureStatus::Failed)),
        _ => None,
    }
}

fn has_nested_records(obj: &Map<String, Value>) -> bool {
    obj.values().any(|v| {
        v.as_array()
            .is_some_and(|items| items.iter().any(|i| i.as_object().is_some_and(|o| classify(o).is_some())))
    })
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(message_text).collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        Value::Object(obj) => obj.get("message").and_then(message_text),
        _ => None,
    }
}

fn stack_lines(value: &Value) -> Option<Vec<String>> {
    let lines: Vec<String> = match value {
        Value::String(s) => s
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| match i {
                Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            })
            .collect(),
        _ => return None,
    };
    (!lines.is_empty()).then_some(lines)
}
