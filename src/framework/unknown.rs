//! Fallback for workflows no build tool could be matched to.

use std::path::Path;

use super::BuildTool;
use crate::report::TestCaseRecord;

/// A build tool that recognises no test commands.
///
/// Workflows of unsupported languages, unparseable files and workflows
/// without any build tool keyword get this variant; they are never
/// instrumented or run.
#[derive(Debug, Clone, Default)]
pub struct UnknownTool;

impl UnknownTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for UnknownTool {
    fn label(&self) -> String {
        "unknown".to_string()
    }

    fn is_test_command(&self, _command: &str) -> bool {
        false
    }

    fn report_location(&self) -> &str {
        ""
    }

    fn test_results(&self, _repo_root: &Path) -> Vec<TestCaseRecord> {
        Vec::new()
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}
