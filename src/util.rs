//! Shared utility functions for the mend crate.

use regex::Regex;
use std::sync::LazyLock;

static ANSI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07|\x1b[()][A-Z0-9]").unwrap()
});

/// Remove ANSI escape sequences (colors, cursor movement, OSC titles).
pub fn strip_ansi(text: &str) -> String {
    ANSI_REGEX.replace_all(text, "").into_owned()
}

/// Upper bound on opening brackets probed by [`extract_json`] on large console logs.
const MAX_JSON_CANDIDATES: usize = 64;

/// Extract a JSON document (object or array) from text that may contain other content.
///
/// Uses bracket-counting that skips over string literals, so braces inside
/// messages do not end the scan early. Candidates that fail to parse are
/// skipped and the scan continues after them.
pub fn extract_json(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    let mut candidates = 0;

    while let Some(offset) = text[search_from..].find(['{', '[']) {
        candidates += 1;
        if candidates > MAX_JSON_CANDIDATES {
            break;
        }
        let start = search_from + offset;
        if let Some(end) = matching_close(bytes, start) {
            let candidate = &text[start..end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate.to_string());
            }
        }
        search_from = start + 1;
    }

    None
}

fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Clip `text` to at most `max_chars` characters, appending an ellipsis when clipped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(extract_json(text), Some(r#"{"key": "value"}"#.to_string()));
    }

    #[test]
    fn test_extract_json_with_runner_banner() {
        let text = "> jest --json\nDetermining test suites...\n{\"numFailedTests\": 1}\nDone";
        assert_eq!(
            extract_json(text),
            Some("{\"numFailedTests\": 1}".to_string())
        );
    }

    #[test]
    fn test_extract_json_array() {
        let text = r#"results: [{"name": "a"}, {"name": "b"}] end"#;
        assert_eq!(
            extract_json(text),
            Some(r#"[{"name": "a"}, {"name": "b"}]"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_braces_inside_strings() {
        let text = r#"{"message": "expected } got {"}"#;
        assert_eq!(extract_json(text), Some(text.to_string()));
    }

    #[test]
    fn test_extract_json_skips_bracketed_log_prefix() {
        let text = "[INFO] starting\n{\"ok\": true}";
        assert_eq!(extract_json(text), Some("{\"ok\": true}".to_string()));
    }

    #[test]
    fn test_extract_json_no_json() {
        assert_eq!(extract_json("No JSON here"), None);
    }

    #[test]
    fn test_extract_json_unclosed() {
        assert_eq!(extract_json(r#"{"key": "value""#), None);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mFAIL\x1b[0m src/a.test.js"), "FAIL src/a.test.js");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo…");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
