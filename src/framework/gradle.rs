//! Gradle build tool.
//!
//! Gradle's `test` task writes JUnit XML to `build/test-results/test`. The
//! only instrumentation needed is dropping `-x test`, which excludes the
//! task from a `build` or `check` invocation.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{BuildTool, collapse_whitespace, ensure_flag, rewrite_test_steps};
use crate::workflow::WorkflowResult;
use crate::workflow::document::WorkflowDocument;

static TEST_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(gradle|gradlew)\s+(?:[^\s&|;]+\s+)*(test|check|build|buildDependents|buildNeeded)\b")
        .expect("valid gradle test pattern")
});

static EXCLUDE_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-x\s+test\b").expect("valid exclude pattern"));

#[derive(Debug, Clone, Default)]
pub struct GradleTool;

impl GradleTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for GradleTool {
    fn label(&self) -> String {
        "gradle".to_string()
    }

    fn is_test_command(&self, command: &str) -> bool {
        TEST_COMMAND.is_match(command)
    }

    fn instrument_test_steps(
        &mut self,
        doc: &mut WorkflowDocument,
        _repo_root: &Path,
    ) -> WorkflowResult<()> {
        rewrite_test_steps(
            doc,
            |c| self.is_test_command(c),
            |line| collapse_whitespace(&EXCLUDE_TEST.replace_all(line, "")),
        );
        Ok(())
    }

    fn instrument_offline(&self, doc: &mut WorkflowDocument) {
        rewrite_test_steps(
            doc,
            |c| self.is_test_command(c),
            |line| ensure_flag(line, "--offline"),
        );
    }

    fn report_location(&self) -> &str {
        "build/test-results/test"
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}
