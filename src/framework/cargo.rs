//! Cargo build tool.
//!
//! libtest can emit a JSON event stream, but only behind the unstable
//! `-Z unstable-options` switch. Test commands are rewritten to:
//!
//! ```text
//! RUSTC_BOOTSTRAP=1 cargo test -- -Z unstable-options --format json --report-time \
//!     | cargo2junit > results.xml
//! ```
//!
//! `RUSTC_BOOTSTRAP=1` unlocks the flag on a stable toolchain and
//! `cargo2junit` converts the event stream to JUnit XML.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{
    BuildTool, append_to_first_test_job, insert_before_first_test_step, rewrite_test_steps,
};
use crate::workflow::WorkflowResult;
use crate::workflow::document::WorkflowDocument;

const REPORT: &str = "results.xml";

/// Directory the online image build collects manifests in.
const DEPENDENCY_CACHE: &str = "~/replayci-cache";

static TEST_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcargo\s+(?:[^\s&|;]+\s+)*?test\b").expect("valid cargo test pattern")
});

static SHELL_OPERATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&&|\|\||;|\|").expect("valid operator pattern"));

/// Rewrites the `cargo test` segment of a line; commands chained before or
/// after it are kept as they are.
fn pipe_to_junit(line: &str) -> String {
    if line.contains("cargo2junit") {
        return line.to_string();
    }
    let Some(test) = TEST_COMMAND.find(line) else {
        return line.to_string();
    };

    let end = SHELL_OPERATOR
        .find(&line[test.end()..])
        .map_or(line.len(), |op| test.end() + op.start());
    let command = line[test.start()..end].trim_end();
    let tail = match line[end..].trim() {
        "" => String::new(),
        rest => format!(" {}", rest),
    };

    let separator = if command.split_whitespace().any(|t| t == "--") {
        " "
    } else {
        " -- "
    };
    format!(
        "{}RUSTC_BOOTSTRAP=1 {}{}-Z unstable-options --format json --report-time | cargo2junit > {}{}",
        &line[..test.start()],
        command,
        separator,
        REPORT,
        tail
    )
}

fn add_offline(line: &str) -> String {
    if line.split_whitespace().any(|t| t == "--offline") {
        return line.to_string();
    }
    TEST_COMMAND.replace(line, "$0 --offline").into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct CargoTool;

impl CargoTool {
    pub fn new() -> Self {
        Self
    }
}

impl BuildTool for CargoTool {
    fn label(&self) -> String {
        "cargo".to_string()
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

    fn instrument_offline(&self, doc: &mut WorkflowDocument) {
        rewrite_test_steps(doc, |c| self.is_test_command(c), add_offline);
    }

    fn instrument_online(&self, doc: &mut WorkflowDocument) {
        insert_before_first_test_step(
            doc,
            |c| self.is_test_command(c),
            &[("Install cargo2junit", "cargo install cargo2junit")],
        );

        let cache = format!(
            "mkdir -p {0} && cp Cargo.lock {0} || : && cp Cargo.toml {0} || :",
            DEPENDENCY_CACHE
        );
        append_to_first_test_job(
            doc,
            |c| self.is_test_command(c),
            "Cache dependencies",
            &cache,
        );
    }

    fn report_location(&self) -> &str {
        REPORT
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}
