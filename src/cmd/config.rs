//! Configuration view and validation commands: `mend config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use mend::config::{CliOverrides, Config};
    use mend::init::MEND_DIR;
    use mend::mend_config::{CONFIG_FILE, MendToml, global_config_path};

    let config_path = project_dir.join(MEND_DIR).join(CONFIG_FILE);
    let source = if config_path.exists() {
        Some(config_path.clone())
    } else {
        global_config_path().filter(|p| p.exists())
    };

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("mend Configuration");
            println!("==================");
            println!();

            match &source {
                Some(path) => println!("Config file: {}", path.display()),
                None => {
                    println!("No mend.toml found at {}", config_path.display());
                    println!("Using default configuration. Run 'mend init' to create one.");
                }
            }
            println!();

            let config = Config::load(project_dir.to_path_buf(), false, CliOverrides::default())?;
            let toml = &config.toml;
            let limit = config.model_limit();

            println!("[test]");
            match &config.test_command {
                Some(command) => println!("  command = \"{}\"", command),
                None => println!("  command = (not set)"),
            }
            println!("  format = \"{}\"", toml.test.format);
            if let Some(report) = &toml.test.report_file {
                println!("  report_file = \"{}\"", report.display());
            }
            println!("  timeout_secs = {}", toml.test.timeout_secs);
            println!();

            println!("[model]");
            println!("  id = \"{}\"", config.model_id);
            println!("  backend = \"{}\"", config.backend);
            println!("  safety_margin = \"{}\"", toml.model.safety_margin);
            println!("  scaffold_tokens = {}", toml.model.scaffold_tokens);
            println!("  max_output_tokens = {}", toml.model.max_output_tokens);
            println!("  request_timeout_secs = {}", toml.model.request_timeout_secs);
            println!("  max_retries = {}", toml.model.max_retries);
            println!();

            println!("[retry]");
            println!("  max_attempts = {}", config.max_attempts);
            println!("  chunk_size = {}", toml.retry.chunk_size);
            println!("  on_over_budget = \"{}\"", config.on_over_budget);
            println!();

            println!("[compression]");
            println!("  stack_window = {}", toml.compression.stack_window);
            println!(
                "  aggressive_stack_window = {}",
                toml.compression.aggressive_stack_window
            );
            println!("  message_max_chars = {}", toml.compression.message_max_chars);
            println!("  target_reduction = {}", toml.compression.target_reduction);
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!(
                "  input limit = {} (safe limit {})",
                limit.input_token_limit,
                limit.safe_limit()
            );
            println!(
                "  ANTHROPIC_API_KEY = {}",
                if config.api_key.is_some() { "set" } else { "not set" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = match &source {
                Some(path) => MendToml::load(path)?,
                None => {
                    println!("No mend.toml found. Using defaults.");
                    MendToml::default()
                }
            };
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
