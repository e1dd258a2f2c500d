//! Keyword-based build tool identification.
//!
//! Every `run` command of a workflow is lower-cased and split on whitespace.
//! Each token equal to a build tool keyword scores one point for that tool;
//! the tool with the highest score wins. Ties go to the tool registered
//! first in [`BuildToolKind::ALL`].

use super::document::WorkflowDocument;
use crate::framework::BuildToolKind;

/// Identifies the build tool a workflow drives.
///
/// Returns `None` when no keyword appears in any `run` command.
pub fn classify(doc: &WorkflowDocument) -> Option<BuildToolKind> {
    let mut scores = [0usize; BuildToolKind::ALL.len()];

    for command in doc.run_commands() {
        for token in command.to_lowercase().split_whitespace() {
            for (score, kind) in scores.iter_mut().zip(BuildToolKind::ALL) {
                if kind.keywords().contains(&token) {
                    *score += 1;
                }
            }
        }
    }

    let mut best: Option<(BuildToolKind, usize)> = None;
    for (score, kind) in scores.into_iter().zip(BuildToolKind::ALL) {
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((kind, score));
        }
    }
    best.map(|(kind, _)| kind)
}

/// Parses `content` and identifies its build tool.
///
/// Unparseable or empty documents have no build tool.
pub fn classify_str(content: &str) -> Option<BuildToolKind> {
    WorkflowDocument::parse(content)
        .ok()
        .and_then(|doc| classify(&doc))
}
