//! Go build tool.
//!
//! `go test -v` output is converted to JUnit XML by piping it through
//! `go-junit-report`. `-set-exit-code` keeps the step failing when tests
//! fail, as it would without the pipe.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

use super::{BuildTool, insert_before_first_test_step, rewrite_test_steps};
use crate::workflow::WorkflowResult;
use crate::workflow::document::{WorkflowDocument, step_run};

const REPORT: &str = "report.xml";

static TEST_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgo\s+(?:[^\s&|;]+\s+)*?test\b").expect("valid go test pattern")
});

static GO_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgo\s+test\b").expect("valid go test pattern"));

fn pipe_to_junit(line: &str) -> String {
    if line.contains("go-junit-report") {
        return line.to_string();
    }

    let line = if line.split_whitespace().any(|t| t == "-v") {
        line.to_string()
    } else {
        GO_TEST.replace(line, "go test -v").into_owned()
    };
    format!(
        "{} 2>&1 | go-junit-report -set-exit-code > {}",
        line, REPORT
    )
}

#[derive(Debug, Clone, Default)]
pub struct GoTool;

impl GoTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for GoTool {
    fn label(&self) -> String {
        "go".to_string()
    }

    fn is_test_command(&self, command: &str) -> bool {
        TEST_COMMAND.is_match(command)
    }

    fn instrument_test_steps(
        &mut self,
        doc: &mut WorkflowDocument,
        _repo_root: &Path,
    ) -> WorkflowResult<()> {
        rewrite_test_steps(doc, |c| self.is_test_command(c), pipe_to_junit);
        Ok(())
    }

    /// Resolves modules from the vendor directory or module cache only.
    fn instrument_offline(&self, doc: &mut WorkflowDocument) {
        for step in doc.steps_mut() {
            if !step_run(step).is_some_and(|run| self.is_test_command(run)) {
                continue;
            }

            if !step.get("env").is_some_and(Value::is_mapping) {
                step.insert(Value::from("env"), Value::Mapping(Mapping::new()));
            }
            if let Some(env) = step.get_mut("env").and_then(Value::as_mapping_mut) {
                env.insert(Value::from("GOFLAGS"), Value::from("-mod=mod"));
                env.insert(Value::from("GOPROXY"), Value::from("off"));
            }
        }
    }

    fn instrument_online(&self, doc: &mut WorkflowDocument) {
        insert_before_first_test_step(
            doc,
            |c| self.is_test_command(c),
            &[(
                "Install go-junit-report",
                "go install github.com/jstemmer/go-junit-report/v2@latest",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::document::step_name;

    const WORKFLOW: &str = r#"
jobs:
  test:
    steps:
      - uses: actions/setup-go@v5
      - run: go build ./...
      - name: Test
        run: go test -race ./...
"#;

    #[test]
    fn test_is_test_command() {
        let tool = GoTool::new();
        assert!(tool.is_test_command("go test ./..."));
        assert!(tool.is_test_command("go -C sub test"));
        assert!(!tool.is_test_command("go build ./..."));
        assert!(!tool.is_test_command("cargo test"));
        assert!(!tool.is_test_command("go mod download && echo test"));
        assert!(tool.is_test_command("go mod download && go test ./..."));
    }

    #[test]
    fn test_pipe_to_junit() {
        assert_eq!(
            pipe_to_junit("go test ./..."),
            "go test -v ./... 2>&1 | go-junit-report -set-exit-code > report.xml"
        );
        assert_eq!(
            pipe_to_junit("go test -v ./pkg"),
            "go test -v ./pkg 2>&1 | go-junit-report -set-exit-code > report.xml"
        );
        let once = pipe_to_junit("go test ./...");
        assert_eq!(pipe_to_junit(&once), once);
    }

    #[test]
    fn test_offline_sets_env_on_test_steps() {
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        GoTool::new().instrument_offline(&mut doc);

        let steps = doc.root()["jobs"]["test"]["steps"].as_sequence().unwrap();
        assert!(steps[1].get("env").is_none());
        assert_eq!(steps[2]["env"]["GOFLAGS"].as_str(), Some("-mod=mod"));
        assert_eq!(steps[2]["env"]["GOPROXY"].as_str(), Some("off"));
    }

    #[test]
    fn test_online_installs_report_tool_once() {
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        let tool = GoTool::new();
        tool.instrument_online(&mut doc);
        tool.instrument_online(&mut doc);

        let names: Vec<_> = doc.steps().filter_map(step_name).collect();
        assert_eq!(names, vec!["Install go-junit-report", "Test"]);
        let steps = doc.root()["jobs"]["test"]["steps"].as_sequence().unwrap();
        assert_eq!(steps[2]["name"].as_str(), Some("Install go-junit-report"));
    }
}
