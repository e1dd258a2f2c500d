//! Construction of [`Workflow`]s from files on disk.

use std::path::Path;

use tracing::debug;

use super::classifier::classify;
use super::document::WorkflowDocument;
use super::{Workflow, suffixed_path};
use crate::framework::BuildTool;
use crate::framework::BuildToolKind;
use crate::framework::cargo::CargoTool;
use crate::framework::go::GoTool;
use crate::framework::gradle::GradleTool;
use crate::framework::maven::MavenTool;
use crate::framework::package::PackageTool;
use crate::framework::pytest::PytestTool;
use crate::framework::unittest::UnittestTool;
use crate::framework::unknown::UnknownTool;

/// Builds workflows with the variant matching their language and build tool.
pub struct WorkflowFactory;

impl WorkflowFactory {
    /// Loads a workflow and selects its build tool variant.
    ///
    /// The document is parsed from `content` when given, otherwise read from
    /// `path`. Unreadable or empty documents and languages without a
    /// matching variant get [`UnknownTool`].
    pub fn create(path: &Path, content: Option<&str>, language: &str, repo_root: &Path) -> Workflow {
        let parsed = match content {
            Some(content) => WorkflowDocument::parse(content),
            None => WorkflowDocument::load(path),
        };

        let (doc, kind) = match parsed {
            Ok(doc) => {
                let kind = classify(&doc);
                (doc, kind)
            }
            Err(e) => {
                debug!("Could not parse workflow {}: {}", path.display(), e);
                (WorkflowDocument::default(), None)
            }
        };

        let tool = Self::build_tool(language, kind);
        debug!(
            "Workflow {} uses build tool {}",
            path.display(),
            tool.label()
        );
        Workflow::new(path, repo_root, doc, tool)
    }

    /// Maps a repository language and detected build tool to a variant.
    pub fn build_tool(language: &str, kind: Option<BuildToolKind>) -> Box<dyn BuildTool> {
        let language = language.trim().to_lowercase();
        let Some(kind) = kind else {
            return Box::new(UnknownTool::new());
        };

        match (language.as_str(), kind) {
            ("java", BuildToolKind::Maven) => Box::new(MavenTool::new()),
            ("java" | "kotlin", BuildToolKind::Gradle) => Box::new(GradleTool::new()),
            ("python", BuildToolKind::Pytest) => Box::new(PytestTool::new()),
            ("python", BuildToolKind::Unittest) => Box::new(UnittestTool::new()),
            ("go", BuildToolKind::Go) => Box::new(GoTool::new()),
            ("rust", BuildToolKind::Cargo) => Box::new(CargoTool::new()),
            ("typescript" | "javascript", BuildToolKind::Npm) => Box::new(PackageTool::npm()),
            ("typescript" | "javascript", BuildToolKind::Yarn) => Box::new(PackageTool::yarn()),
            ("typescript" | "javascript", BuildToolKind::Pnpm) => Box::new(PackageTool::pnpm()),
            _ => Box::new(UnknownTool::new()),
        }
    }

    /// Splits a workflow into one workflow per job.
    ///
    /// Each copy keeps a single job and is saved as
    /// `<stem>-<job>.<ext>`. Workflows without tests yield nothing.
    pub fn split_by_jobs(workflow: &Workflow) -> Vec<Workflow> {
        if !workflow.has_tests() {
            return Vec::new();
        }
        let Some(jobs) = workflow.document().jobs() else {
            return Vec::new();
        };

        jobs.keys()
            .filter_map(|key| key.as_str())
            .map(|job| {
                let mut split = workflow.clone();
                split.retain_job(job);
                let suffix: String = job.chars().filter(|c| !c.is_whitespace()).collect();
                split.set_path(suffixed_path(workflow.path(), &suffix));
                split
            })
            .collect()
    }
}
