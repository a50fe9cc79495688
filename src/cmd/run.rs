//! The repair loop command: `mend run`.

use anyhow::Result;
use std::path::PathBuf;

use crate::Cli;
use mend::audit::AuditLogger;
use mend::config::{CliOverrides, Config};
use mend::gates::{FixedChooser, InteractiveChooser, RecoveryChoice, RecoveryChooser};
use mend::lock::RunLock;
use mend::mend_config::ModelBackend;
use mend::orchestrator::{
    ClaudeCliClient, FileBlockApplier, FixApplier, HttpModelClient, ModelClient, NoopApplier,
    RetryOrchestrator, ShellTestRunner,
};
use mend::ui::RunUI;

/// Returns the process exit code: 0 when the tests pass, 1 when attempts ran
/// out, 2 when budget recovery was aborted.
pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, overrides: CliOverrides) -> Result<i32> {
    let config = Config::load(project_dir, cli.verbose, overrides)?;
    config.ensure_directories()?;
    let _lock = RunLock::acquire(&config.lock_file())?;

    for warning in config.toml.validate() {
        tracing::debug!(%warning, "Configuration warning");
    }

    let retry_config = config.retry_config()?;
    let limit = config.model_limit();

    let runner = ShellTestRunner::new(
        &retry_config.test_command,
        config.project_dir.clone(),
        config.test_timeout(),
    )
    .with_report_file(config.toml.test.report_file.clone());

    let model: Box<dyn ModelClient> = match config.backend {
        ModelBackend::Http => Box::new(HttpModelClient::new(
            &config.toml.model.api_url,
            config.require_api_key()?,
            config.request_timeout(),
            config.toml.model.max_output_tokens,
            config.toml.model.max_retries,
        )?),
        ModelBackend::ClaudeCli => Box::new(ClaudeCliClient::new(
            &config.toml.model.claude_cmd,
            config.project_dir.clone(),
            config.request_timeout(),
            config.toml.model.max_retries,
        )),
    };

    let applier: Box<dyn FixApplier> = if config.dry_run {
        Box::new(NoopApplier)
    } else {
        Box::new(FileBlockApplier::new(config.project_dir.clone()))
    };

    let chooser: Box<dyn RecoveryChooser> = match config.on_over_budget.fixed_choice() {
        Some(choice) => Box::new(FixedChooser::new(choice)),
        None if console::user_attended() => Box::new(InteractiveChooser),
        None => {
            tracing::warn!("No terminal to ask on; over-budget reports will abort the run");
            Box::new(FixedChooser::new(RecoveryChoice::Abort))
        }
    };

    let audit = AuditLogger::new(&config.audit_dir).with_artifact_dir(&config.log_dir);
    let ui = RunUI::new(config.max_attempts, config.verbose);

    tracing::info!(
        model = %config.model_id,
        safe_limit = limit.safe_limit(),
        dry_run = config.dry_run,
        "Starting repair run"
    );

    let mut orchestrator =
        RetryOrchestrator::new(retry_config, limit, Box::new(runner), model, applier, chooser)
            .with_audit(audit)
            .with_ui(ui);

    let report = orchestrator.run().await?;
    if let Some(path) = &report.audit_file {
        println!("Audit log: {}", path.display());
    }

    Ok(report.status.exit_code())
}
