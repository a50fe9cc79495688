//! Offline inspection commands: `mend parse`, `mend compress`, `mend limits`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::read_input;
use mend::config::{CliOverrides, Config};
use mend::compaction::Compressor;
use mend::gates::PreflightValidator;
use mend::orchestrator::PromptBuilder;
use mend::parser::{OutputFormat, OutputParser};
use mend::tokens::count_tokens;

pub fn cmd_parse(file: Option<&Path>, format: OutputFormat, json: bool) -> Result<()> {
    let raw = read_input(file)?;
    let report = OutputParser::new().parse(&raw, format);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    println!(
        "{} failing test(s) ({})",
        style(report.failures.len()).bold(),
        report.framework_detected
    );
    for failure in &report.failures {
        let first_line = failure.message.lines().next().unwrap_or("");
        println!(
            "  {} {} {}",
            style(failure.status).red(),
            failure.qualified_name(),
            style(first_line).dim()
        );
    }
    if let Some(remainder) = &report.unparsed_remainder {
        println!(
            "{}",
            style(format!("{} unattributed line(s)", remainder.lines().count())).dim()
        );
    }
    Ok(())
}

/// Options for [`cmd_compress`].
pub struct CompressArgs {
    pub format: OutputFormat,
    pub budget: Option<usize>,
    pub model: Option<String>,
    pub aggressive: bool,
    pub json: bool,
}

pub fn cmd_compress(project_dir: &Path, file: Option<&Path>, args: CompressArgs) -> Result<()> {
    let config = Config::load(project_dir.to_path_buf(), false, CliOverrides::default())?;
    let raw = read_input(file)?;
    let parsed = OutputParser::new().parse(&raw, args.format);

    let mut settings = config.toml.compression.to_settings();
    if args.aggressive {
        settings = settings.aggressive();
    }

    let budget = match (&args.model, args.budget) {
        (Some(model), _) => {
            let limit = config.registry().limit_for(model);
            let scaffold = config
                .toml
                .model
                .scaffold_tokens
                .max(PromptBuilder::new(config.test_command.as_deref().unwrap_or("")).scaffold_tokens());
            PreflightValidator::new(scaffold).report_budget(&limit)
        }
        (None, Some(budget)) => budget,
        (None, None) => settings.default_budget(count_tokens(&raw)),
    };

    let report = Compressor::new(settings).compress(&parsed, budget);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{}", report.rendered);
    }

    eprintln!(
        "{} ~{} → ~{} tokens (budget {}, {:.0}% smaller, {}), {} omitted",
        style("compressed:").dim(),
        report.original_token_estimate,
        report.compressed_token_estimate,
        budget,
        report.reduction() * 100.0,
        report.level,
        report.omitted_count
    );
    Ok(())
}

pub fn cmd_limits(project_dir: &Path, model: Option<&str>) -> Result<()> {
    let config = Config::load(project_dir.to_path_buf(), false, CliOverrides::default())?;
    let registry = config.registry();

    let limits = match model {
        Some(id) => vec![registry.limit_for(id)],
        None => registry.entries(),
    };

    println!(
        "{:<24} {:>12} {:>8} {:>12}",
        style("MODEL").bold(),
        style("INPUT LIMIT").bold(),
        style("MARGIN").bold(),
        style("SAFE LIMIT").bold()
    );
    for limit in limits {
        let marker = if limit.model_id == config.model_id { "*" } else { " " };
        println!(
            "{:<24} {:>12} {:>7.0}% {:>12} {}",
            limit.model_id,
            limit.input_token_limit,
            limit.safety_margin_fraction * 100.0,
            limit.safe_limit(),
            marker
        );
    }
    Ok(())
}
