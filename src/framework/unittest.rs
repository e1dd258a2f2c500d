//! unittest build tool.
//!
//! The standard library runner has no JUnit output. Test commands are
//! switched to `python -m xmlrunner` from `unittest-xml-reporting`, which
//! accepts the same arguments and writes a single XML file.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{BuildTool, insert_before_first_test_step, rewrite_test_steps};
use crate::workflow::WorkflowResult;
use crate::workflow::document::WorkflowDocument;

const REPORT: &str = "report.xml";

static TEST_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpython[0-9.]*\s+-m\s+(unittest|xmlrunner)\b")
        .expect("valid unittest test pattern")
});

static UNITTEST_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-m\s+unittest\b").expect("valid module pattern"));

static OUTPUT_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--output-file\s+\S+").expect("valid output pattern"));

fn use_xmlrunner(line: &str) -> String {
    let line = UNITTEST_MODULE.replace_all(line, "-m xmlrunner");
    let flag = format!("--output-file {}", REPORT);
    if OUTPUT_FILE.is_match(&line) {
        OUTPUT_FILE.replace_all(&line, flag.as_str()).into_owned()
    } else {
        format!("{} {}", line, flag)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UnittestTool;

impl UnittestTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for UnittestTool {
    fn label(&self) -> String {
        "unittest".to_string()
    }

    fn is_test_command(&self, command: &str) -> bool {
        TEST_COMMAND.is_match(command)
    }

    fn instrument_test_steps(
        &mut self,
        doc: &mut WorkflowDocument,
        _repo_root: &Path,
    ) -> WorkflowResult<()> {
        rewrite_test_steps(doc, |c| self.is_test_command(c), use_xmlrunner);
        Ok(())
    }

    fn instrument_online(&self, doc: &mut WorkflowDocument) {
        insert_before_first_test_step(
            doc,
            |c| self.is_test_command(c),
            &[(
                "Install unittest-xml-reporting",
                "pip install unittest-xml-reporting",
            )],
        );
    }

    fn report_location(&self) -> &str {
        REPORT
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}
