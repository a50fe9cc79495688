//! Running the project's test command.

use crate::errors::RunError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

/// Outcome of one test command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRun {
    /// `None` when the process was killed (timeout or signal).
    pub exit_code: Option<i32>,
    /// The JSON report file when one was configured and written, otherwise
    /// stdout followed by stderr.
    pub output: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl TestRun {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs the tests once.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> Result<TestRun, RunError>;
}

/// Runs a shell command through `sh -c` in the project directory.
#[derive(Debug, Clone)]
pub struct ShellTestRunner {
    command: String,
    project_dir: PathBuf,
    timeout: Duration,
    report_file: Option<PathBuf>,
}

impl ShellTestRunner {
    pub fn new(command: &str, project_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            project_dir,
            timeout,
            report_file: None,
        }
    }

    /// Read this file (relative to the project) after each run instead of the
    /// console output, when it exists.
    pub fn with_report_file(mut self, report_file: Option<PathBuf>) -> Self {
        self.report_file = report_file.map(|p| {
            if p.is_absolute() {
                p
            } else {
                self.project_dir.join(p)
            }
        });
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(&self) -> Result<TestRun, RunError> {
        // A report left over from an earlier run must not be mistaken for this one.
        if let Some(report) = &self.report_file
            && report.exists()
            && let Err(e) = std::fs::remove_file(report)
        {
            tracing::warn!(
                path = %report.display(),
                error = %e,
                "Could not remove the previous report file; it may be read back as this run's output"
            );
        }

        tracing::info!(command = %self.command, timeout_secs = self.timeout.as_secs(), "Running tests");
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        set_process_group(&mut cmd);

        let child = cmd.spawn().map_err(|source| RunError::TestCommand {
            command: self.command.clone(),
            source,
        })?;
        let pid = child.id();

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RunError::TestCommand {
                command: self.command.clone(),
                source,
            })?,
            Err(_) => {
                // Dropping the future kills `sh`; the group kill reaches
                // everything it spawned.
                kill_process_group(pid);
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Test command timed out");
                return Ok(TestRun {
                    exit_code: None,
                    output: format!(
                        "Test command timed out after {} seconds: {}",
                        self.timeout.as_secs(),
                        self.command
                    ),
                    timed_out: true,
                    duration: start.elapsed(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let text = match &self.report_file {
            Some(report) => match std::fs::read_to_string(report) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::debug!(path = %report.display(), error = %e, "Report file not written; using console output");
                    combined
                }
            },
            None => combined,
        };

        let run = TestRun {
            exit_code: output.status.code(),
            output: text,
            timed_out: false,
            duration: start.elapsed(),
        };
        tracing::info!(
            exit_code = ?run.exit_code,
            duration_ms = run.duration.as_millis() as u64,
            "Tests finished"
        );
        Ok(run)
    }
}

/// Run the command in its own process group so a timeout can kill the whole tree.
#[cfg(unix)]
fn set_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn set_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    // The group id equals the leader's pid because of `process_group(0)`.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            pgid = pid,
            error = %std::io::Error::last_os_error(),
            "Process group already gone"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_passing_command() {
        let dir = tempdir().unwrap();
        let runner = ShellTestRunner::new("echo ok", dir.path().to_path_buf(), Duration::from_secs(10));
        let run = runner.run().await.unwrap();
        assert!(run.passed());
        assert_eq!(run.output.trim(), "ok");
    }

    #[tokio::test]
    async fn test_failing_command_captures_both_streams() {
        let dir = tempdir().unwrap();
        let runner = ShellTestRunner::new(
            "echo 'FAILED a.py::t - boom'; echo 'warning' >&2; exit 1",
            dir.path().to_path_buf(),
            Duration::from_secs(10),
        );
        let run = runner.run().await.unwrap();
        assert!(!run.passed());
        assert_eq!(run.exit_code, Some(1));
        assert!(run.output.contains("FAILED a.py::t - boom"));
        assert!(run.output.contains("warning"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let dir = tempdir().unwrap();
        let runner = ShellTestRunner::new("sleep 10", dir.path().to_path_buf(), Duration::from_secs(1));
        let started = Instant::now();
        let run = runner.run().await.unwrap();
        assert!(run.timed_out);
        assert!(!run.passed());
        assert!(run.output.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_pipeline_children() {
        let dir = tempdir().unwrap();
        let runner = ShellTestRunner::new(
            "(sleep 2; touch marker) | cat",
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        );
        let run = runner.run().await.unwrap();
        assert!(run.timed_out);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_report_file_preferred_and_stale_report_removed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("report.json"), "stale").unwrap();

        let runner = ShellTestRunner::new(
            "echo console; echo '{\"tests\": []}' > report.json; exit 1",
            dir.path().to_path_buf(),
            Duration::from_secs(10),
        )
        .with_report_file(Some(PathBuf::from("report.json")));
        let run = runner.run().await.unwrap();
        assert_eq!(run.output.trim(), "{\"tests\": []}");

        let no_report = ShellTestRunner::new("echo console; exit 1", dir.path().to_path_buf(), Duration::from_secs(10))
            .with_report_file(Some(PathBuf::from("report.json")));
        let run = no_report.run().await.unwrap();
        assert_eq!(run.output.trim(), "console");
    }

    #[tokio::test]
    async fn test_unremovable_report_path_falls_back_to_console() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("report.json")).unwrap();

        let runner = ShellTestRunner::new("echo console; exit 1", dir.path().to_path_buf(), Duration::from_secs(10))
            .with_report_file(Some(PathBuf::from("report.json")));
        let run = runner.run().await.unwrap();
        assert_eq!(run.exit_code, Some(1));
        assert_eq!(run.output.trim(), "console");
    }
}
