use super::{AttemptRecord, AuditEvent, AuditRun, RunConfig, RunOutcome};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RUN_EXTENSION: &str = "jsonl";

struct ActiveRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    file: PathBuf,
}

pub struct AuditLogger {
    audit_dir: PathBuf,
    artifact_dir: Option<PathBuf>,
    current: Option<ActiveRun>,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        Self {
            audit_dir: audit_dir.to_path_buf(),
            artifact_dir: None,
            current: None,
        }
    }

    /// Also keep full prompts and responses under `logs_dir/<run-id>/`.
    pub fn with_artifact_dir(mut self, logs_dir: &Path) -> Self {
        self.artifact_dir = Some(logs_dir.to_path_buf());
        self
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.audit_dir.join("runs")
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|r| r.run_id)
    }

    /// Path of the active run's file.
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_ref().map(|r| r.file.as_path())
    }

    pub fn start_run(&mut self, config: RunConfig) -> Result<Uuid> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let runs_dir = self.runs_dir();
        fs::create_dir_all(&runs_dir).with_context(|| {
            format!("Failed to create audit directory: {}", runs_dir.display())
        })?;

        let filename = format!(
            "{}_{}.{}",
            started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run_id.to_string()[..8],
            RUN_EXTENSION
        );
        self.current = Some(ActiveRun {
            run_id,
            started_at,
            file: runs_dir.join(filename),
        });

        self.append(&AuditEvent::RunStarted {
            run_id,
            started_at,
            config,
        })?;
        Ok(run_id)
    }

    /// Append one attempt. The line is on disk when this returns.
    ///
    /// Returns an error if no run is active.
    pub fn record_attempt(&mut self, record: &AttemptRecord) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("record_attempt called with no active run");
        }
        self.append(&AuditEvent::Attempt(record.clone()))
    }

    pub fn finish_run(&mut self, outcome: RunOutcome, remaining: &[String]) -> Result<PathBuf> {
        let run = self
            .current
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;
        let run_id = run.run_id;

        self.append(&AuditEvent::RunFinished {
            run_id,
            ended_at: Utc::now(),
            outcome,
            remaining: remaining.to_vec(),
        })?;

        let file = self
            .current
            .take()
            .map(|r| r.file)
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;
        Ok(file)
    }

    /// Write a prompt or response for `attempt` next to the run. Returns
    /// `None` when no artifact directory is configured or no run is active.
    pub fn save_artifact(&self, attempt: u32, kind: &str, content: &str) -> Result<Option<PathBuf>> {
        let (Some(logs_dir), Some(run)) = (&self.artifact_dir, &self.current) else {
            return Ok(None);
        };
        let dir = logs_dir.join(format!(
            "{}_{}",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        ));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let path = dir.join(format!("attempt-{}-{}.md", attempt, kind));
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Some(path))
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        let run = self
            .current
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No active run"))?;
        let line = serde_json::to_string(event).context("Failed to serialize audit event")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&run.file)
            .with_context(|| format!("Failed to open audit file: {}", run.file.display()))?;
        writeln!(file, "{}", line).context("Failed to write audit event")?;
        file.sync_data().context("Failed to flush audit file")?;
        Ok(())
    }

    /// Run files, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == RUN_EXTENSION).unwrap_or(false))
            .collect();

        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<AuditRun> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read audit run file: {}", path.display()))?;

        let mut run: Option<AuditRun> = None;
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(line).with_context(|| {
                format!("Failed to parse line {} of {}", i + 1, path.display())
            })?;

            match event {
                AuditEvent::RunStarted {
                    run_id,
                    started_at,
                    config,
                } => {
                    run = Some(AuditRun {
                        run_id,
                        started_at,
                        ended_at: None,
                        config,
                        attempts: Vec::new(),
                        outcome: None,
                        remaining: Vec::new(),
                    });
                }
                AuditEvent::Attempt(record) => {
                    run.as_mut()
                        .context("Attempt recorded before run_started")?
                        .attempts
                        .push(record);
                }
                AuditEvent::RunFinished {
                    ended_at,
                    outcome,
                    remaining,
                    ..
                } => {
                    let run = run.as_mut().context("run_finished before run_started")?;
                    run.ended_at = Some(ended_at);
                    run.outcome = Some(outcome);
                    run.remaining = remaining;
                }
            }
        }

        run.with_context(|| format!("No run_started event in {}", path.display()))
    }

    /// The most recent run, if any.
    pub fn latest_run(&self) -> Result<Option<AuditRun>> {
        match self.list_runs()?.first() {
            Some(path) => self.load_run(path).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AttemptOutcome;
    use tempfile::TempDir;

    fn setup_logger() -> (AuditLogger, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let logger = AuditLogger::new(&dir.path().join("audit"));
        (logger, dir)
    }

    fn make_run_config() -> RunConfig {
        RunConfig {
            model_id: "claude-sonnet-4".to_string(),
            test_command: "pytest -q".to_string(),
            max_attempts: 4,
            chunk_size: 10,
            input_token_limit: 200_000,
            safe_limit: 190_000,
            scaffold_tokens: 1_500,
            project_dir: PathBuf::from("."),
            dry_run: false,
        }
    }

    #[test]
    fn test_record_attempt_without_active_run_returns_err() {
        let (mut logger, _dir) = setup_logger();
        let record = AttemptRecord::new(1, Utc::now(), AttemptOutcome::Fixed);
        assert!(logger.record_attempt(&record).is_err());
    }

    #[test]
    fn test_finish_without_active_run_returns_err() {
        let (mut logger, _dir) = setup_logger();
        assert!(logger.finish_run(RunOutcome::Success, &[]).is_err());
    }

    #[test]
    fn test_attempts_are_on_disk_before_finish() {
        let (mut logger, _dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        logger
            .record_attempt(&AttemptRecord::new(1, Utc::now(), AttemptOutcome::StillFailing))
            .unwrap();

        let path = logger.current_file().unwrap().to_path_buf();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        // A run that never finishes still loads.
        let run = logger.load_run(&path).unwrap();
        assert_eq!(run.attempts.len(), 1);
        assert!(!run.is_finished());
        assert_eq!(run.outcome, None);
    }

    #[test]
    fn test_full_run_round_trip() {
        let (mut logger, _dir) = setup_logger();
        let run_id = logger.start_run(make_run_config()).unwrap();
        logger
            .record_attempt(&AttemptRecord::new(1, Utc::now(), AttemptOutcome::StillFailing))
            .unwrap();
        logger
            .record_attempt(&AttemptRecord::new(2, Utc::now(), AttemptOutcome::Fixed))
            .unwrap();
        let path = logger.finish_run(RunOutcome::Success, &[]).unwrap();

        assert_eq!(path.extension().unwrap(), "jsonl");
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .contains(&run_id.to_string()[..8])
        );
        assert!(logger.run_id().is_none());

        let run = logger.load_run(&path).unwrap();
        assert_eq!(run.run_id, run_id);
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.attempts[1].outcome, AttemptOutcome::Fixed);
        assert_eq!(run.outcome, Some(RunOutcome::Success));
        assert!(run.is_finished());
    }

    #[test]
    fn test_every_line_is_a_tagged_event() {
        let (mut logger, _dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        logger
            .record_attempt(&AttemptRecord::new(1, Utc::now(), AttemptOutcome::BudgetExceeded))
            .unwrap();
        let path = logger
            .finish_run(RunOutcome::Aborted, &["tests/a.py::test_x".to_string()])
            .unwrap();

        let events: Vec<serde_json::Value> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).expect("each line must be valid JSON"))
            .collect();
        let tags: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["run_started", "attempt", "run_finished"]);
        assert_eq!(events[2]["remaining"][0], "tests/a.py::test_x");
        assert_eq!(events[0]["config"]["model_id"], "claude-sonnet-4");
    }

    #[test]
    fn test_list_runs_most_recent_first() {
        let (logger, _dir) = setup_logger();
        let runs_dir = logger.runs_dir();
        fs::create_dir_all(&runs_dir).unwrap();
        fs::write(runs_dir.join("2026-01-01T00-00-00_aaaaaaaa.jsonl"), "").unwrap();
        fs::write(runs_dir.join("2026-03-01T00-00-00_bbbbbbbb.jsonl"), "").unwrap();
        fs::write(runs_dir.join("notes.txt"), "").unwrap();

        let runs = logger.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].to_string_lossy().contains("2026-03-01"));
    }

    #[test]
    fn test_list_runs_missing_dir_is_empty() {
        let (logger, _dir) = setup_logger();
        assert!(logger.list_runs().unwrap().is_empty());
        assert!(logger.latest_run().unwrap().is_none());
    }

    #[test]
    fn test_load_run_rejects_garbage() {
        let (logger, dir) = setup_logger();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "not json\n").unwrap();
        assert!(logger.load_run(&path).is_err());
    }

    #[test]
    fn test_save_artifact() {
        let (logger, dir) = setup_logger();
        let mut logger = logger.with_artifact_dir(&dir.path().join("logs"));
        assert!(logger.save_artifact(1, "prompt", "x").unwrap().is_none());

        logger.start_run(make_run_config()).unwrap();
        let path = logger
            .save_artifact(1, "prompt", "the prompt")
            .unwrap()
            .unwrap();
        assert!(path.ends_with("attempt-1-prompt.md"));
        assert_eq!(fs::read_to_string(path).unwrap(), "the prompt");
    }
}
