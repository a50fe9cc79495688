//! Project initialization command: `mend init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path, test_command: Option<&str>) -> Result<()> {
    use mend::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir, test_command)?;

    if result.created {
        println!("Initialized mend project at {}", result.mend_dir.display());
        println!();
        println!("Created directory structure:");
        println!("  .mend/");
        println!("  ├── mend.toml     # Configuration (see `mend config show`)");
        println!("  ├── audit/runs/   # Attempt history (see `mend audit`)");
        println!("  └── logs/         # Prompts, responses and mend.log");
        println!();
        println!("Next steps:");
        if test_command.is_none() {
            println!("  1. Set [test] command in .mend/mend.toml");
        } else {
            println!("  1. Check the settings in .mend/mend.toml");
        }
        println!("  2. Export ANTHROPIC_API_KEY (or set [model] backend = \"claude-cli\")");
        println!("  3. Run `mend run`");
    } else if was_initialized {
        println!(
            "mend project already initialized at {}",
            result.mend_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing mend.toml.");
        }
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed mend initialization at {}",
            result.mend_dir.display()
        );
    }

    Ok(())
}
