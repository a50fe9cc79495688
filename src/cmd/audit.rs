//! Attempt history commands: `mend audit`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::AuditCommands;
use mend::audit::{AuditLogger, AuditRun};
use mend::init::MEND_DIR;

pub fn cmd_audit(project_dir: &Path, command: Option<AuditCommands>) -> Result<()> {
    let audit = AuditLogger::new(&project_dir.join(MEND_DIR).join("audit"));

    match command.unwrap_or(AuditCommands::List) {
        AuditCommands::List => {
            let runs = audit.list_runs()?;
            if runs.is_empty() {
                println!("No runs recorded yet.");
                return Ok(());
            }
            for path in runs {
                match audit.load_run(&path) {
                    Ok(run) => print_run_line(&run),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable run"),
                }
            }
        }
        AuditCommands::Show { run, json } => {
            let found = match run {
                Some(prefix) => find_run(&audit, &prefix)?,
                None => audit.latest_run()?,
            };
            let Some(run) = found else {
                anyhow::bail!("No matching run found in {}", audit.runs_dir().display());
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&run).context("Failed to serialize run")?
                );
            } else {
                print_run_details(&run);
            }
        }
    }
    Ok(())
}

fn find_run(audit: &AuditLogger, prefix: &str) -> Result<Option<AuditRun>> {
    for path in audit.list_runs()? {
        let run = audit.load_run(&path)?;
        if run.run_id.to_string().starts_with(prefix) {
            return Ok(Some(run));
        }
    }
    Ok(None)
}

fn outcome_label(run: &AuditRun) -> String {
    match run.outcome {
        Some(outcome) => outcome.to_string(),
        None => "interrupted".to_string(),
    }
}

fn print_run_line(run: &AuditRun) {
    let id = run.run_id.to_string();
    println!(
        "{}  {}  {:<16} {} attempt(s)  {}",
        style(&id[..8]).cyan(),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        outcome_label(run),
        run.attempts.len(),
        style(&run.config.model_id).dim()
    );
}

fn print_run_details(run: &AuditRun) {
    println!();
    println!("Run {}", style(run.run_id).cyan());
    println!("  started:  {}", run.started_at.to_rfc3339());
    if let Some(ended) = run.ended_at {
        println!("  ended:    {}", ended.to_rfc3339());
    }
    println!("  outcome:  {}", outcome_label(run));
    println!("  command:  {}", run.config.test_command);
    println!(
        "  model:    {} (safe limit {} of {})",
        run.config.model_id, run.config.safe_limit, run.config.input_token_limit
    );
    if run.config.dry_run {
        println!("  dry run");
    }
    println!();

    for attempt in &run.attempts {
        println!(
            "  Attempt {}: {} ({:.1}s, {} failing)",
            attempt.attempt_number,
            style(attempt.outcome).bold(),
            attempt.duration_secs,
            attempt.failing_tests.len()
        );
        if let Some(report) = &attempt.report {
            println!(
                "    report: ~{} → ~{} tokens, {}, {} omitted",
                report.original_token_estimate,
                report.compressed_token_estimate,
                report.level,
                report.omitted_count
            );
        }
        if !attempt.recovery.is_empty() {
            let choices: Vec<String> = attempt.recovery.iter().map(|c| c.to_string()).collect();
            println!("    recovery: {}", choices.join(" → "));
        }
        for batch in &attempt.batches {
            println!(
                "    batch {}: {} ({} tests)",
                batch.index,
                batch.outcome,
                batch.failing_tests.len()
            );
        }
        if let Some(fix) = &attempt.fix_summary {
            for path in &fix.files_written {
                println!("    wrote {}", path);
            }
        }
        if let Some(error) = &attempt.error {
            println!("    error: {}", style(error).red());
        }
    }

    if !run.remaining.is_empty() {
        println!();
        println!("  Still failing:");
        for name in &run.remaining {
            println!("    - {}", name);
        }
    }
    println!();
}
