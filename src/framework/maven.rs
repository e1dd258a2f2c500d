//! Maven build tool.
//!
//! Surefire writes one JUnit XML file per test class into
//! `target/surefire-reports` by default, so instrumenting a Maven workflow
//! only has to make sure the tests are not skipped.

use std::sync::LazyLock;

use regex::Regex;

use super::{BuildTool, collapse_whitespace, ensure_flag, rewrite_test_steps};
use crate::workflow::WorkflowResult;
use crate::workflow::document::WorkflowDocument;

static TEST_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(maven|mvn|mavenw|mvnw)\s+(?:[^\s&|;]+\s+)*(test|package|verify|install)\b")
        .expect("valid maven test pattern")
});

static SKIP_TESTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-DskipTests(=\S*)?|-Dmaven\.test\.skip=true").expect("valid skip pattern")
});

#[derive(Debug, Clone, Default)]
pub struct MavenTool;

impl MavenTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for MavenTool {
    fn label(&self) -> String {
        "maven".to_string()
    }

    fn is_test_command(&self, command: &str) -> bool {
        TEST_COMMAND.is_match(command)
    }

    fn instrument_test_steps(
        &mut self,
        doc: &mut WorkflowDocument,
        _repo_root: &std::path::Path,
    ) -> WorkflowResult<()> {
        rewrite_test_steps(
            doc,
            |c| self.is_test_command(c),
            |line| collapse_whitespace(&SKIP_TESTS.replace_all(line, "")),
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
        "target/surefire-reports"
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}
