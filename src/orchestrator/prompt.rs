//! Prompt assembly around a compressed report.

use crate::compaction::CompressedReport;
use crate::tokens::TokenCounter;

/// Where the compressed report goes in the template.
const REPORT_SLOT: &str = "{report}";

const DEFAULT_TEMPLATE: &str = r#"You are fixing failing tests in a software project.

## TEST COMMAND
{command}

## FAILING TESTS
{report}

## RULES
1. Fix the code under test, not the tests, unless a test is clearly wrong
2. Keep changes minimal and focused on the failures above
3. Return every changed file in full, wrapped exactly like this:
<file path="relative/path/from/project/root">
complete file contents
</file>
4. Do not return files you did not change
{batch}"#;

/// Builds the model prompt for one report.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    test_command: String,
    counter: TokenCounter,
}

impl PromptBuilder {
    pub fn new(test_command: &str) -> Self {
        Self {
            test_command: test_command.to_string(),
            counter: TokenCounter::new(),
        }
    }

    /// Full prompt for `report`. `batch` is `(index, total)` for chunked recovery.
    pub fn build(&self, report: &CompressedReport, batch: Option<(usize, usize)>) -> String {
        self.fill(&report.rendered, batch)
    }

    /// Tokens the template costs on its own, including the longest batch note.
    pub fn scaffold_tokens(&self) -> usize {
        self.counter.count(&self.fill("", Some((999, 999))))
    }

    fn fill(&self, report: &str, batch: Option<(usize, usize)>) -> String {
        let batch_note = match batch {
            Some((index, total)) => format!(
                "\n## BATCH\nThis is batch {} of {}. Other failures are handled in separate requests; fix only the ones listed here.\n",
                index, total
            ),
            None => String::new(),
        };
        DEFAULT_TEMPLATE
            .replace("{command}", &self.test_command)
            .replace("{batch}", &batch_note)
            // Last, so braces inside the report are never treated as slots.
            .replace(REPORT_SLOT, report)
    }
}
