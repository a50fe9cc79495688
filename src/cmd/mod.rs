//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                |
//! |------------|---------------------------------|
//! | `project`  | `Init`                          |
//! | `run`      | `Run`                           |
//! | `inspect`  | `Parse`, `Compress`, `Limits`   |
//! | `audit`    | `Audit`                         |
//! | `config`   | `Config`                        |

pub mod audit;
pub mod config;
pub mod inspect;
pub mod project;
pub mod run;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use inspect::{CompressArgs, cmd_compress, cmd_limits, cmd_parse};
pub use project::cmd_init;
pub use run::cmd_run;

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

/// Read test output from `file`, or from stdin when no file is given.
pub(crate) fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read test output from stdin")?;
            Ok(buf)
        }
    }
}
