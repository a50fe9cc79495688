//! Applying a model's proposed fix to the project.
//!
//! The prompt asks for whole-file replacements wrapped in tags:
//!
//! ```text
//! <file path="src/math.py">
//! def add(a, b):
//!     return a + b
//! </file>
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

static FILE_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<file\s+path="([^"]+)"\s*>\n?(.*?)</file>"#).unwrap());

static FENCE_OPEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z0-9_+.-]*[ \t]*\n").unwrap());

static FENCE_CLOSE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n?```\s*$").unwrap());

/// One `<file>` block from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
}

/// What a fix applier did with a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSummary {
    pub files_written: Vec<String>,
    /// Blocks not written, with the reason.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl FixSummary {
    pub fn is_empty(&self) -> bool {
        self.files_written.is_empty()
    }
}

/// Turns a model response into changes in the project.
pub trait FixApplier: Send + Sync {
    fn apply(&self, response: &str) -> Result<FixSummary>;
}

/// Extract every `<file path="...">` block, unwrapping a Markdown code fence
/// around the content when present.
pub fn extract_file_blocks(response: &str) -> Vec<FileBlock> {
    FILE_BLOCK_REGEX
        .captures_iter(response)
        .filter_map(|cap| {
            let path = cap.get(1)?.as_str().trim().to_string();
            let body = cap.get(2)?.as_str();
            if path.is_empty() {
                return None;
            }
            Some(FileBlock {
                path,
                content: strip_code_fence(body),
            })
        })
        .collect()
}

fn strip_code_fence(body: &str) -> String {
    if !FENCE_OPEN_REGEX.is_match(body) {
        return body.to_string();
    }
    let inner = FENCE_OPEN_REGEX.replace(body, "");
    let mut inner = FENCE_CLOSE_REGEX.replace(&inner, "").into_owned();
    if !inner.ends_with('\n') {
        inner.push('\n');
    }
    inner
}

/// Resolve `relative` under `root`, rejecting absolute paths and `..`.
fn contained_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return None;
    }
    let mut resolved = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (resolved != root).then_some(resolved)
}

/// Writes `<file>` blocks into the project directory.
#[derive(Debug, Clone)]
pub struct FileBlockApplier {
    project_dir: PathBuf,
}

impl FileBlockApplier {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }
}

impl FixApplier for FileBlockApplier {
    fn apply(&self, response: &str) -> Result<FixSummary> {
        let mut summary = FixSummary::default();

        for block in extract_file_blocks(response) {
            let Some(target) = contained_path(&self.project_dir, &block.path) else {
                tracing::warn!(path = %block.path, "Refusing to write outside the project");
                summary
                    .skipped
                    .push(format!("{} (outside project directory)", block.path));
                continue;
            };

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
            std::fs::write(&target, &block.content)
                .with_context(|| format!("Failed to write fix to {}", target.display()))?;

            tracing::info!(path = %block.path, bytes = block.content.len(), "Applied fix");
            summary.files_written.push(block.path);
        }

        if summary.files_written.is_empty() && summary.skipped.is_empty() {
            tracing::warn!("Model response contained no <file> blocks");
        }

        Ok(summary)
    }
}

/// Dry-run applier: records what would be written.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopApplier;

impl FixApplier for NoopApplier {
    fn apply(&self, response: &str) -> Result<FixSummary> {
        Ok(FixSummary {
            files_written: Vec::new(),
            skipped: extract_file_blocks(response)
                .into_iter()
                .map(|b| format!("{} (dry run)", b.path))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_file_blocks() {
        let response = r#"The sum is off by one.

<file path="src/math.py">
def add(a, b):
    return a + b
</file>

<file path="tests/conftest.py">
import pytest
</file>"#;
        let blocks = extract_file_blocks(response);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].path, "src/math.py");
        assert_eq!(blocks[0].content, "def add(a, b):\n    return a + b\n");
        assert_eq!(blocks[1].content, "import pytest\n");
    }

    #[test]
    fn test_extract_strips_code_fence() {
        let response = "<file path=\"a.js\">\n```javascript\nmodule.exports = 1;\n```\n</file>";
        let blocks = extract_file_blocks(response);
        assert_eq!(blocks[0].content, "module.exports = 1;\n");
    }

    #[test]
    fn test_extract_none() {
        assert!(extract_file_blocks("I could not find the bug.").is_empty());
        assert!(extract_file_blocks("<file path=\"\">x</file>").is_empty());
    }

    #[test]
    fn test_contained_path() {
        let root = Path::new("/project");
        assert_eq!(
            contained_path(root, "./src/a.rs"),
            Some(PathBuf::from("/project/src/a.rs"))
        );
        assert_eq!(contained_path(root, "../etc/passwd"), None);
        assert_eq!(contained_path(root, "src/../../x"), None);
        assert_eq!(contained_path(root, "/etc/passwd"), None);
        assert_eq!(contained_path(root, "."), None);
    }

    #[test]
    fn test_file_block_applier_writes_files() {
        let dir = TempDir::new().unwrap();
        let applier = FileBlockApplier::new(dir.path());
        let response = "<file path=\"pkg/deep/mod.py\">\nVALUE = 2\n</file>\n\
                        <file path=\"../escape.py\">\nbad\n</file>";

        let summary = applier.apply(response).unwrap();
        assert_eq!(summary.files_written, vec!["pkg/deep/mod.py".to_string()]);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].contains("escape.py"));

        let written = std::fs::read_to_string(dir.path().join("pkg/deep/mod.py")).unwrap();
        assert_eq!(written, "VALUE = 2\n");
        assert!(!dir.path().parent().unwrap().join("escape.py").exists());
    }

    #[test]
    fn test_noop_applier_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let summary = NoopApplier
            .apply("<file path=\"a.py\">\nx = 1\n</file>")
            .unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.skipped, vec!["a.py (dry run)".to_string()]);
        assert!(!dir.path().join("a.py").exists());
    }
}
