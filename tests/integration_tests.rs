//! Integration tests for mend
//!
//! These drive the compiled binary against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a mend Command with a clean environment
fn mend() -> Command {
    let mut cmd = cargo_bin_cmd!("mend");
    cmd.env_remove("MEND_MODEL")
        .env_remove("MEND_MAX_ATTEMPTS")
        .env_remove("MEND_TEST_COMMAND")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("CLAUDE_CMD")
        .env_remove("RUST_LOG");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_mend_project(dir: &TempDir, config: &str) {
    mend()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    fs::write(dir.path().join(".mend/mend.toml"), config).unwrap();
}

const JEST_REPORT: &str = r#"{
  "numFailedTests": 1,
  "testResults": [{
    "name": "/app/src/sum.test.js",
    "status": "failed",
    "message": "",
    "assertionResults": [
      {
        "ancestorTitles": ["sum"],
        "title": "adds numbers",
        "status": "failed",
        "failureMessages": ["Error: expect(received).toBe(expected)\n\nExpected: 3\nReceived: 4\n    at Object.<anonymous> (/app/src/sum.test.js:4:17)"]
      },
      {
        "ancestorTitles": ["sum"],
        "title": "handles zero",
        "status": "passed",
        "failureMessages": []
      }
    ]
  }]
}"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_mend_help() {
        mend()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("compress"));
    }

    #[test]
    fn test_mend_version() {
        mend().arg("--version").assert().success();
    }

    #[test]
    fn test_mend_init_creates_structure() {
        let dir = create_temp_project();

        mend()
            .current_dir(dir.path())
            .args(["init", "--test-command", "pytest -q"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized mend project"));

        assert!(dir.path().join(".mend/audit/runs").is_dir());
        assert!(dir.path().join(".mend/logs").is_dir());
        let toml = fs::read_to_string(dir.path().join(".mend/mend.toml")).unwrap();
        assert!(toml.contains("pytest -q"));
    }

    #[test]
    fn test_mend_init_idempotent() {
        let dir = create_temp_project();
        init_mend_project(&dir, "[test]\ncommand = \"make test\"\n");

        mend()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));

        let toml = fs::read_to_string(dir.path().join(".mend/mend.toml")).unwrap();
        assert!(toml.contains("make test"));
    }

    #[test]
    fn test_invalid_format_is_rejected() {
        mend()
            .args(["parse", "--format", "xml"])
            .write_stdin("")
            .assert()
            .failure();
    }
}

// =============================================================================
// Parse / Compress / Limits
// =============================================================================

mod inspection {
    use super::*;

    #[test]
    fn test_parse_jest_report_from_file() {
        let dir = create_temp_project();
        let report = dir.path().join("report.json");
        fs::write(&report, JEST_REPORT).unwrap();

        mend()
            .current_dir(dir.path())
            .arg("parse")
            .arg(&report)
            .assert()
            .success()
            .stdout(predicate::str::contains("1 failing test(s) (jest)"))
            .stdout(predicate::str::contains("sum › adds numbers"))
            .stdout(predicate::str::contains("handles zero").not());
    }

    #[test]
    fn test_parse_json_output_from_stdin() {
        let output = mend()
            .args(["parse", "--json"])
            .write_stdin(JEST_REPORT)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["framework_detected"], "jest");
        assert_eq!(value["failures"].as_array().unwrap().len(), 1);
        assert_eq!(value["failures"][0]["location"], "/app/src/sum.test.js");
    }

    #[test]
    fn test_parse_console_output() {
        let console = "\
running 2 tests
test tests::adds ... FAILED
test tests::zero ... ok

failures:

---- tests::adds stdout ----
thread 'tests::adds' panicked at src/lib.rs:10:9:
assertion `left == right` failed
  left: 4
 right: 3

test result: FAILED. 1 passed; 1 failed; 0 ignored
";
        mend()
            .args(["parse", "--format", "console"])
            .write_stdin(console)
            .assert()
            .success()
            .stdout(predicate::str::contains("tests::adds"))
            .stdout(predicate::str::contains("tests::zero").not());
    }

    #[test]
    fn test_compress_reports_token_counts() {
        let dir = create_temp_project();

        let output = mend()
            .current_dir(dir.path())
            .args(["compress", "--json", "--budget", "100000"])
            .write_stdin(JEST_REPORT)
            .assert()
            .success()
            .stderr(predicate::str::contains("compressed:"))
            .get_output()
            .stdout
            .clone();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        let original = value["original_token_estimate"].as_u64().unwrap();
        let compressed = value["compressed_token_estimate"].as_u64().unwrap();
        assert!(compressed <= original);
        assert_eq!(value["omitted_count"], 0);
        assert!(value["rendered"].as_str().unwrap().contains("adds numbers"));
    }

    #[test]
    fn test_limits_lists_known_models() {
        let dir = create_temp_project();
        mend()
            .current_dir(dir.path())
            .arg("limits")
            .assert()
            .success()
            .stdout(predicate::str::contains("claude-sonnet-4"))
            .stdout(predicate::str::contains("190000"))
            .stdout(predicate::str::contains("gpt-4o"));
    }

    #[test]
    fn test_limits_uses_configured_override() {
        let dir = create_temp_project();
        init_mend_project(
            &dir,
            "[models.\"local-llm\"]\ninput_token_limit = 10000\nsafety_margin = \"80%\"\n",
        );

        mend()
            .current_dir(dir.path())
            .args(["limits", "local-llm"])
            .assert()
            .success()
            .stdout(predicate::str::contains("local-llm"))
            .stdout(predicate::str::contains("8000"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        mend()
            .current_dir(dir.path())
            .env("HOME", dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No mend.toml found"))
            .stdout(predicate::str::contains("claude-sonnet-4"))
            .stdout(predicate::str::contains("max_attempts = 4"));
    }

    #[test]
    fn test_config_show_applies_env_overrides() {
        let dir = create_temp_project();
        init_mend_project(&dir, "[model]\nid = \"gpt-4o\"\n");

        mend()
            .current_dir(dir.path())
            .env("MEND_MODEL", "deepseek-chat")
            .env("MEND_MAX_ATTEMPTS", "9")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("id = \"deepseek-chat\""))
            .stdout(predicate::str::contains("max_attempts = 9"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        init_mend_project(
            &dir,
            "[test]\ncommand = \"npm test\"\n[model]\nsafety_margin = \"150%\"\n",
        );

        mend()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("safety_margin"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = create_temp_project();
        init_mend_project(&dir, "[test]\ncommand = \"npm test\"\n");

        mend()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }
}

// =============================================================================
// Repair runs
// =============================================================================

#[cfg(unix)]
mod runs {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A stand-in for the `claude` CLI that always answers with one file block.
    fn fake_claude(dir: &TempDir) -> std::path::PathBuf {
        let script = dir.path().join("fake-claude.sh");
        fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf '<file path=\"fixed.txt\">\\nok\\n</file>\\n'\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn test_run_without_test_command_fails() {
        let dir = create_temp_project();
        init_mend_project(&dir, "");

        mend()
            .current_dir(dir.path())
            .args(["run", "--backend", "claude-cli"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No test command configured"));
    }

    #[test]
    fn test_run_passing_tests_exits_zero() {
        let dir = create_temp_project();
        init_mend_project(&dir, "");

        mend()
            .current_dir(dir.path())
            .args(["run", "--backend", "claude-cli", "--test-command", "true"])
            .assert()
            .code(0)
            .stdout(predicate::str::contains("Audit log:"));

        mend()
            .current_dir(dir.path())
            .args(["audit", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("success"));
    }

    #[test]
    fn test_run_applies_fix_and_retests() {
        let dir = create_temp_project();
        init_mend_project(&dir, "[test]\ncommand = \"test -f fixed.txt\"\n");
        let claude = fake_claude(&dir);

        mend()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", &claude)
            .args(["run", "--backend", "claude-cli"])
            .assert()
            .code(0);

        assert_eq!(
            fs::read_to_string(dir.path().join("fixed.txt")).unwrap(),
            "ok\n"
        );

        mend()
            .current_dir(dir.path())
            .args(["audit", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Attempt 1: still_failing"))
            .stdout(predicate::str::contains("Attempt 2: fixed"))
            .stdout(predicate::str::contains("wrote fixed.txt"));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = create_temp_project();
        init_mend_project(&dir, "[test]\ncommand = \"test -f fixed.txt\"\n");
        let claude = fake_claude(&dir);

        mend()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", &claude)
            .args(["run", "--backend", "claude-cli", "--dry-run"])
            .assert()
            .code(1);

        assert!(!dir.path().join("fixed.txt").exists());
    }

    #[test]
    fn test_run_exhausts_attempts() {
        let dir = create_temp_project();
        init_mend_project(&dir, "[test]\ncommand = \"false\"\n");
        let claude = fake_claude(&dir);

        mend()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", &claude)
            .args(["run", "--backend", "claude-cli", "--max-attempts", "2"])
            .assert()
            .code(1);

        mend()
            .current_dir(dir.path())
            .args(["audit", "show", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"outcome\": \"partial_success\""));
    }

    #[test]
    fn test_over_budget_abort_exits_two() {
        let dir = create_temp_project();
        init_mend_project(
            &dir,
            r#"
[test]
command = "echo 'FAILED tests/test_x.py::test_x - AssertionError' && false"

[model]
id = "tiny"

[retry]
on_over_budget = "abort"

[models."tiny"]
input_token_limit = 1000
"#,
        );

        mend()
            .current_dir(dir.path())
            .args(["run", "--backend", "claude-cli"])
            .env("CLAUDE_CMD", "/nonexistent/claude")
            .assert()
            .code(2);

        mend()
            .current_dir(dir.path())
            .args(["audit", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("budget_exceeded"))
            .stdout(predicate::str::contains("aborted"));
    }
}
