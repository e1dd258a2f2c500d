//! npm, yarn and pnpm build tools.
//!
//! JavaScript workflows usually call a `package.json` script (`npm test`,
//! `yarn run test:unit`) rather than the test runner itself, so the JUnit
//! flags go into the script declared in the manifest at the repository
//! root. The three package managers share this implementation and differ
//! only in the command they are invoked with.
//!
//! | Runner | Flags added to the script |
//! |--------|---------------------------|
//! | jest | `--reporters=default --reporters=jest-junit` |
//! | mocha | `--reporter mocha-junit-reporter --reporter-options mochaFile=junit.xml` |
//! | vitest | `--reporter=default --reporter=junit --outputFile.junit=junit.xml` |

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use super::{BuildTool, collapse_whitespace, insert_before_first_test_step, rewrite_test_steps};
use crate::workflow::WorkflowResult;
use crate::workflow::document::WorkflowDocument;

const REPORT: &str = "junit.xml";
const MANIFEST: &str = "package.json";

static NPM_TEST: LazyLock<Regex> = LazyLock::new(|| test_pattern("npm"));
static YARN_TEST: LazyLock<Regex> = LazyLock::new(|| test_pattern("yarn"));
static PNPM_TEST: LazyLock<Regex> = LazyLock::new(|| test_pattern("pnpm"));

static JEST_REPORTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--reporters=\S+").expect("valid jest reporter pattern"));
static MOCHA_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--reporter-options.*mochaFile=[^\s,]+").expect("valid mocha file pattern")
});
static MOCHA_REPORTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--reporter[=\s]\S+").expect("valid mocha reporter pattern"));
static MOCHA_OPTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--reporter-options\s\S+").expect("valid mocha options pattern")
});
static VITEST_OUTPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--outputFile\.junit=\S+").expect("valid vitest output pattern"));

/// `<tool> [args...] test...` without crossing a shell operator.
fn test_pattern(tool: &str) -> Regex {
    Regex::new(&format!(r"\b{}\s+(?:[^\s&|;]+\s+)*?test", tool))
        .expect("valid package manager test pattern")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }

    fn test_command(self) -> &'static Regex {
        match self {
            PackageManager::Npm => &NPM_TEST,
            PackageManager::Yarn => &YARN_TEST,
            PackageManager::Pnpm => &PNPM_TEST,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test runner behind a `package.json` script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRunner {
    Jest,
    Mocha,
    Vitest,
    Unknown,
}

impl TestRunner {
    pub fn detect(script: &str) -> Self {
        if script.contains("jest") {
            TestRunner::Jest
        } else if script.contains("mocha") {
            TestRunner::Mocha
        } else if script.contains("vitest") || script.contains("vite") {
            TestRunner::Vitest
        } else {
            TestRunner::Unknown
        }
    }
}

/// Adds the JUnit reporter flags for the runner used by `script`.
///
/// Scripts for an unrecognised runner are returned unchanged.
pub fn add_junit_xml(script: &str) -> String {
    match TestRunner::detect(script) {
        TestRunner::Jest => jest_with_junit(script),
        TestRunner::Mocha => mocha_with_junit(script),
        TestRunner::Vitest => vitest_with_junit(script),
        TestRunner::Unknown => script.to_string(),
    }
}

/// jest always writes `junit.xml` through `jest-junit`.
fn jest_with_junit(script: &str) -> String {
    let mut script = script.to_string();
    if !script.contains("--reporters=jest-junit") {
        if !script.contains("--reporters=") {
            script.push_str(" --reporters=default --reporters=jest-junit");
        } else {
            if !script.contains("--reporters=default") {
                script.push_str(" --reporters=default");
            }
            script.push_str(" --reporters=jest-junit");
        }
    }

    // Reporters are moved to the end, deduplicated in order.
    let mut reporters: Vec<&str> = Vec::new();
    for reporter in JEST_REPORTER.find_iter(&script) {
        if !reporters.contains(&reporter.as_str()) {
            reporters.push(reporter.as_str());
        }
    }
    let rest = JEST_REPORTER.replace_all(&script, "");
    format!("{} {}", collapse_whitespace(&rest), reporters.join(" "))
}

fn mocha_with_junit(script: &str) -> String {
    const REPORTER: &str = "--reporter mocha-junit-reporter";
    const OPTIONS: &str = "--reporter-options mochaFile=junit.xml";

    if !script.contains("--reporter") {
        return format!("{} {} {}", script, REPORTER, OPTIONS);
    }

    if script.contains(REPORTER) {
        if script.contains("--reporter-options") {
            MOCHA_FILE.replace_all(script, OPTIONS).into_owned()
        } else {
            format!("{} {}", script, OPTIONS)
        }
    } else {
        let script = MOCHA_REPORTER.replace_all(script, REPORTER);
        if script.contains("--reporter-options") {
            MOCHA_OPTIONS.replace_all(&script, OPTIONS).into_owned()
        } else {
            format!("{} {}", script, OPTIONS)
        }
    }
}

fn vitest_with_junit(script: &str) -> String {
    const OUTPUT: &str = "--outputFile.junit=junit.xml";

    let mut script = script.to_string();
    if !script.contains("--reporter=junit") {
        if !script.contains("--reporter=default") {
            script.push_str(" --reporter=default");
        }
        script.push_str(" --reporter=junit ");
        script.push_str(OUTPUT);
        return script;
    }

    if VITEST_OUTPUT.is_match(&script) {
        script = VITEST_OUTPUT.replace_all(&script, OUTPUT).into_owned();
    } else {
        script.push(' ');
        script.push_str(OUTPUT);
    }
    if !script.contains("--reporter=default") {
        script.push_str(" --reporter=default");
    }
    script
}

/// The executable a script starts, skipping `VAR=value` assignments and
/// launchers such as `npx`.
fn script_runner(script: &str) -> Option<String> {
    script
        .split_whitespace()
        .filter(|token| !token.contains('='))
        .find(|token| !matches!(*token, "npx" | "pnpx" | "cross-env" | "dotenv" | "--"))
        .map(str::to_string)
}

/// Shared implementation of the npm, yarn and pnpm variants.
#[derive(Debug, Clone)]
pub struct PackageTool {
    manager: PackageManager,
    /// Runner of the test script, once the manifest has been read.
    runner: Option<String>,
    script: Option<String>,
    /// Manifest rewritten by [`BuildTool::instrument_test_steps`].
    manifest: Option<PathBuf>,
}

impl PackageTool {
    pub fn new(manager: PackageManager) -> Self {
        Self {
            manager,
            runner: None,
            script: None,
            manifest: None,
        }
    }

    pub fn npm() -> Self {
        Self::new(PackageManager::Npm)
    }

    pub fn yarn() -> Self {
        Self::new(PackageManager::Yarn)
    }

    pub fn pnpm() -> Self {
        Self::new(PackageManager::Pnpm)
    }

    pub fn manager(&self) -> PackageManager {
        self.manager
    }

    /// Name of the `package.json` script a test command invokes.
    ///
    /// `npm test` runs `test`, `yarn run test:unit` runs `test:unit`.
    pub fn script_name(&self, command: &str) -> Option<String> {
        let found = self.manager.test_command().find(command)?;
        let start = found.end() - "test".len();
        command[start..]
            .split_whitespace()
            .next()
            .map(str::to_string)
    }

    fn test_runner(&self) -> TestRunner {
        self.script
            .as_deref()
            .map(TestRunner::detect)
            .unwrap_or(TestRunner::Unknown)
    }

    /// Rewrites the test script in `package.json`.
    ///
    /// Returns `true` if the manifest changed on disk.
    fn rewrite_manifest(&mut self, manifest: &Path, script_name: &str) -> WorkflowResult<bool> {
        let content = std::fs::read_to_string(manifest)?;
        let mut package: serde_json::Value = match serde_json::from_str(&content) {
            Ok(package) => package,
            Err(e) => {
                warn!("Ignoring unparseable {}: {}", manifest.display(), e);
                return Ok(false);
            }
        };

        let Some(script) = package
            .get_mut("scripts")
            .and_then(|scripts| scripts.get_mut(script_name))
        else {
            info!("No '{}' script in {}", script_name, manifest.display());
            return Ok(false);
        };
        let Some(original) = script.as_str().map(str::to_string) else {
            return Ok(false);
        };

        self.runner = script_runner(&original);
        self.script = Some(original.clone());

        let rewritten = add_junit_xml(&original);
        if rewritten == original {
            return Ok(false);
        }
        info!(
            "Rewriting script '{}': '{}' -> '{}'",
            script_name, original, rewritten
        );
        *script = serde_json::Value::String(rewritten);

        let mut serialized = serde_json::to_string_pretty(&package)?;
        serialized.push('\n');
        std::fs::write(manifest, serialized)?;
        Ok(true)
    }
}

impl BuildTool for PackageTool {
    fn label(&self) -> String {
        match &self.runner {
            Some(runner) => format!("{}, {}", self.manager, runner),
            None => self.manager.to_string(),
        }
    }

    fn is_test_command(&self, command: &str) -> bool {
        self.manager.test_command().is_match(command)
    }

    fn instrument_test_steps(
        &mut self,
        doc: &mut WorkflowDocument,
        repo_root: &Path,
    ) -> WorkflowResult<()> {
        let script_name = doc
            .run_commands()
            .flat_map(str::lines)
            .find_map(|line| self.script_name(line));
        let Some(script_name) = script_name else {
            return Ok(());
        };

        rewrite_test_steps(doc, |c| self.is_test_command(c), str::to_string);

        let manifest = repo_root.join(MANIFEST);
        if !manifest.is_file() {
            warn!("No {} at {}", MANIFEST, repo_root.display());
            return Ok(());
        }

        if self.rewrite_manifest(&manifest, &script_name)? {
            self.manifest = Some(manifest);
        }
        Ok(())
    }

    fn instrument_online(&self, doc: &mut WorkflowDocument) {
        let install = format!("{} install", self.manager);
        let jest = format!("{} add jest-junit", self.manager);
        let mocha = format!("{} add mocha-junit-reporter", self.manager);

        let mut steps = vec![("Install dependencies", install.as_str())];
        match self.test_runner() {
            TestRunner::Jest => steps.push(("Install jest-junit", jest.as_str())),
            TestRunner::Mocha => steps.push(("Install mocha-junit-reporter", mocha.as_str())),
            TestRunner::Vitest => {}
            TestRunner::Unknown => {
                steps.push(("Install jest-junit", jest.as_str()));
                steps.push(("Install mocha-junit-reporter", mocha.as_str()));
            }
        }

        insert_before_first_test_step(doc, |c| self.is_test_command(c), &steps);
    }

    fn report_location(&self) -> &str {
        REPORT
    }

    fn additional_files(&self) -> Vec<PathBuf> {
        self.manifest.iter().cloned().collect()
    }

    fn clone_box(&self) -> Box<dyn BuildTool> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::document::step_name;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"
name: Node CI
on: [push]
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: actions/setup-node@v4
      - run: npm ci
      - name: Test
        run: npm test
"#;

    fn repo_with_manifest(manifest: &str) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("package.json"), manifest).unwrap();
        temp_dir
    }

    #[test]
    fn test_add_junit_xml() {
        let cases = [
            (
                "vitest",
                "vitest --reporter=default --reporter=junit --outputFile.junit=junit.xml",
            ),
            (
                "vitest --reporter=junit --outputFile.junit=oldfile.xml",
                "vitest --reporter=junit --outputFile.junit=junit.xml --reporter=default",
            ),
            (
                "vitest --reporter=default",
                "vitest --reporter=default --reporter=junit --outputFile.junit=junit.xml",
            ),
            (
                "vitest --reporter=default --reporter=junit --outputFile.junit=junit.xml",
                "vitest --reporter=default --reporter=junit --outputFile.junit=junit.xml",
            ),
            (
                "mocha",
                "mocha --reporter mocha-junit-reporter --reporter-options mochaFile=junit.xml",
            ),
            (
                "mocha --reporter mocha-junit-reporter --reporter-options mochaFile=random.xml",
                "mocha --reporter mocha-junit-reporter --reporter-options mochaFile=junit.xml",
            ),
            (
                "mocha --reporter random --reporter-options random=random --other-arg value",
                "mocha --reporter mocha-junit-reporter --reporter-options mochaFile=junit.xml --other-arg value",
            ),
            (
                "mocha --reporter mocha-junit-reporter --reporter-options mochaFile=junit.xml",
                "mocha --reporter mocha-junit-reporter --reporter-options mochaFile=junit.xml",
            ),
            ("jest", "jest --reporters=default --reporters=jest-junit"),
            (
                "jest --reporters=default",
                "jest --reporters=default --reporters=jest-junit",
            ),
            (
                "jest --reporters=random",
                "jest --reporters=random --reporters=default --reporters=jest-junit",
            ),
            (
                "jest --reporters=default --reporters=jest-junit",
                "jest --reporters=default --reporters=jest-junit",
            ),
            ("node test.js", "node test.js"),
        ];

        for (input, expected) in cases {
            assert_eq!(add_junit_xml(input), expected, "input: {}", input);
        }
    }

    #[test]
    fn test_jest_reporters_move_to_the_end() {
        assert_eq!(
            add_junit_xml("jest --reporters=default --ci --coverage"),
            "jest --ci --coverage --reporters=default --reporters=jest-junit"
        );
    }

    #[test]
    fn test_is_test_command() {
        let npm = PackageTool::npm();
        assert!(npm.is_test_command("npm test"));
        assert!(npm.is_test_command("npm run test:ci"));
        assert!(npm.is_test_command("npm ci && npm test"));
        assert!(!npm.is_test_command("npm ci"));
        assert!(!npm.is_test_command("pnpm test"));
        assert!(!npm.is_test_command("npm ci && make test"));

        let yarn = PackageTool::yarn();
        assert!(yarn.is_test_command("yarn test --coverage"));
        assert!(!yarn.is_test_command("npm test"));
    }

    #[test]
    fn test_script_name() {
        let npm = PackageTool::npm();
        assert_eq!(npm.script_name("npm test").as_deref(), Some("test"));
        assert_eq!(
            npm.script_name("npm run test:unit -- --ci").as_deref(),
            Some("test:unit")
        );
        assert_eq!(npm.script_name("npm ci").as_deref(), None);

        let yarn = PackageTool::yarn();
        assert_eq!(
            yarn.script_name("yarn run test:unit").as_deref(),
            Some("test:unit")
        );
    }

    #[test]
    fn test_script_runner() {
        assert_eq!(script_runner("jest --ci").as_deref(), Some("jest"));
        assert_eq!(
            script_runner("NODE_ENV=test npx mocha 'test/**/*.js'").as_deref(),
            Some("mocha")
        );
        assert_eq!(script_runner("").as_deref(), None);
    }

    #[test]
    fn test_npm_jest_manifest_is_rewritten() {
        let repo = repo_with_manifest(
            r#"{"name": "demo", "scripts": {"build": "tsc", "test": "jest"}}"#,
        );
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        let mut tool = PackageTool::npm();
        assert_eq!(tool.label(), "npm");

        tool.instrument_test_steps(&mut doc, repo.path()).unwrap();

        let manifest = repo.path().join("package.json");
        let package: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&manifest).unwrap()).unwrap();
        assert_eq!(
            package["scripts"]["test"],
            "jest --reporters=default --reporters=jest-junit"
        );
        assert_eq!(package["scripts"]["build"], "tsc");
        assert_eq!(tool.label(), "npm, jest");
        assert_eq!(tool.additional_files(), vec![manifest.clone()]);
        assert_eq!(tool.report_location(), "junit.xml");

        // A second pass leaves the manifest alone.
        let before = std::fs::read_to_string(&manifest).unwrap();
        tool.instrument_test_steps(&mut doc, repo.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), before);
    }

    #[test]
    fn test_missing_manifest_is_not_an_error() {
        let repo = TempDir::new().unwrap();
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        let mut tool = PackageTool::npm();

        tool.instrument_test_steps(&mut doc, repo.path()).unwrap();
        assert_eq!(tool.label(), "npm");
        assert!(tool.additional_files().is_empty());
    }

    #[test]
    fn test_online_steps_for_jest() {
        let repo = repo_with_manifest(r#"{"scripts": {"test": "jest"}}"#);
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        let mut tool = PackageTool::npm();
        tool.instrument_test_steps(&mut doc, repo.path()).unwrap();
        tool.instrument_online(&mut doc);
        tool.instrument_online(&mut doc);

        let names: Vec<_> = doc.steps().filter_map(step_name).collect();
        assert_eq!(
            names,
            vec!["Install dependencies", "Install jest-junit", "Test"]
        );
    }

    #[test]
    fn test_online_steps_for_unknown_runner() {
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        PackageTool::npm().instrument_online(&mut doc);

        let names: Vec<_> = doc.steps().filter_map(step_name).collect();
        assert_eq!(
            names,
            vec![
                "Install dependencies",
                "Install jest-junit",
                "Install mocha-junit-reporter",
                "Test"
            ]
        );
    }

    #[test]
    fn test_online_steps_for_vitest() {
        let repo = repo_with_manifest(r#"{"scripts": {"test": "vitest run"}}"#);
        let mut doc = WorkflowDocument::parse(WORKFLOW).unwrap();
        let mut tool = PackageTool::npm();
        tool.instrument_test_steps(&mut doc, repo.path()).unwrap();
        tool.instrument_online(&mut doc);

        let names: Vec<_> = doc.steps().filter_map(step_name).collect();
        assert_eq!(names, vec!["Install dependencies", "Test"]);
        assert_eq!(tool.label(), "npm, vitest");
    }
}
