//! `mend init`: creates the `.mend/` directory in a project.
//!
//! ```text
//! .mend/
//! ├── mend.toml        # Project configuration
//! ├── audit/           # Attempt history
//! │   └── runs/
//! └── logs/            # Prompt/response artifacts and mend.log
//! ```

use crate::mend_config::{CONFIG_FILE, MendToml};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the mend directory.
pub const MEND_DIR: &str = ".mend";

/// Result of initializing a mend project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .mend directory
    pub mend_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
    /// Whether a mend.toml was written
    pub wrote_config: bool,
}

/// Initialize a mend project in the given directory.
///
/// An existing `mend.toml` is never overwritten. `test_command`, when given,
/// is stored as `[test] command` in a newly written file.
pub fn init_project(project_dir: &Path, test_command: Option<&str>) -> Result<InitResult> {
    let mend_dir = project_dir.join(MEND_DIR);
    let created = !mend_dir.exists();

    ensure_directory_structure(&mend_dir)?;

    let config_path = mend_dir.join(CONFIG_FILE);
    let wrote_config = if config_path.exists() {
        false
    } else {
        let mut config = MendToml::default();
        config.test.command = test_command.map(str::to_string);
        config.save(&config_path)?;
        true
    };

    Ok(InitResult {
        mend_dir,
        created,
        wrote_config,
    })
}

fn ensure_directory_structure(mend_dir: &Path) -> Result<()> {
    for dir in [
        mend_dir.to_path_buf(),
        mend_dir.join("audit"),
        mend_dir.join("audit").join("runs"),
        mend_dir.join("logs"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Check if a project is already initialized with mend.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(MEND_DIR).is_dir()
}
