//! pytest build tool.
//!
//! pytest writes JUnit XML natively with `--junitxml=<path>`. The flag is
//! added to the pytest invocation of a test command (before any pipe), or
//! an existing target is rewritten to `report.xml`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{BuildTool, rewrite_test_steps};
use crate::workflow::WorkflowResult;
use crate::workflow::document::WorkflowDocument;

const REPORT: &str = "report.xml";

/// Shell operators separating the commands of a line.
static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&&|\|\||;|\|").expect("valid separator pattern"));

/// A pytest invocation at the start of a command, optionally behind
/// environment assignments, a project runner or `python -m`.
static INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:\S+=\S*\s+)*",
        r"(?:(?:poetry|pipenv|uv|hatch|pdm)\s+run\s+)?",
        r"(?:(?:python[0-9.]*|coverage\s+run)\s+(?:\S+\s+)*?-m\s+)?",
        r"(?:pytest|py\.test)(?:\s|$)",
    ))
    .expect("valid pytest invocation pattern")
});

static JUNITXML: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--junit-?xml(=|\s+)\S+").expect("valid junitxml pattern"));

/// Byte offset right after the first pytest command of `line`.
fn invocation_end(line: &str) -> Option<usize> {
    let mut start = 0;
    let bounds = SEPARATOR
        .find_iter(line)
        .map(|m| (m.start(), m.end()))
        .chain(std::iter::once((line.len(), line.len())));

    for (end, next) in bounds {
        let segment = &line[start..end];
        if INVOCATION.is_match(segment.trim()) {
            return Some(start + segment.trim_end().len());
        }
        start = next;
    }
    None
}

fn add_junitxml(line: &str) -> String {
    let flag = format!("--junitxml={}", REPORT);
    if JUNITXML.is_match(line) {
        return JUNITXML.replace_all(line, flag.as_str()).into_owned();
    }
    match invocation_end(line) {
        Some(end) => format!("{} {}{}", &line[..end], flag, &line[end..]),
        None => line.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct PytestTool;

impl PytestTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for PytestTool {
    fn label(&self) -> String {
        "pytest".to_string()
    }

    fn is_test_command(&self, command: &str) -> bool {
        command.lines().any(|line| invocation_end(line).is_some())
    }

    fn instrument_test_steps(
        &mut self,
        doc: &mut WorkflowDocument,
        _repo_root: &Path,
    ) -> WorkflowResult<()> {
        rewrite_test_steps(doc, |c| self.is_test_command(c), add_junitxml);
        Ok(())
    }

    fn report_location(&self) -> &str {
        REPORT
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_test_command() {
        let tool = PytestTool::new();
        assert!(tool.is_test_command("pytest"));
        assert!(tool.is_test_command("python -m pytest tests/ -x"));
        assert!(tool.is_test_command("python3.11 -m pytest"));
        assert!(tool.is_test_command("py.test -q"));
        assert!(tool.is_test_command("PYTHONPATH=src poetry run pytest"));
        assert!(tool.is_test_command("pip install -e . && pytest"));
        assert!(tool.is_test_command("coverage run -m pytest"));
        assert!(!tool.is_test_command("pip install pytest pytest-cov"));
        assert!(!tool.is_test_command("python setup.py build"));
    }

    #[test]
    fn test_add_junitxml() {
        assert_eq!(add_junitxml("pytest"), "pytest --junitxml=report.xml");
        assert_eq!(
            add_junitxml("pytest --junitxml=out/results.xml -q"),
            "pytest --junitxml=report.xml -q"
        );
        assert_eq!(
            add_junitxml("pytest --junit-xml out.xml"),
            "pytest --junitxml=report.xml"
        );
        assert_eq!(
            add_junitxml("pytest tests | tee pytest.log"),
            "pytest tests --junitxml=report.xml | tee pytest.log"
        );
        assert_eq!(
            add_junitxml("pytest --junitxml=report.xml"),
            "pytest --junitxml=report.xml"
        );
    }

    #[test]
    fn test_instrument_is_idempotent() {
        let mut doc = WorkflowDocument::parse(
            "jobs:\n  test:\n    steps:\n      - run: pip install -e .\n      - run: '  python -m pytest tests  '\n",
        )
        .unwrap();
        let mut tool = PytestTool::new();
        tool.instrument_test_steps(&mut doc, Path::new("."))
            .unwrap();
        let once = doc.clone();
        tool.instrument_test_steps(&mut doc, Path::new("."))
            .unwrap();

        assert_eq!(doc, once);
        let runs: Vec<_> = doc.run_commands().collect();
        assert_eq!(
            runs,
            vec!["pip install -e .", "python -m pytest tests --junitxml=report.xml"]
        );
    }
}
