//! replayci: replay GitHub Actions test workflows locally.
//!
//! This crate rewrites a repository's CI workflows so that their test steps
//! run under [act](https://github.com/nektos/act) in a local container and
//! leave JUnit XML reports behind, then runs them and collects the results.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Workflow**: Parse workflow documents, classify their build tool and
//!   instrument them ([`workflow`])
//! - **Framework**: Build tool variants (Maven, Gradle, pytest, unittest,
//!   Go, Cargo, npm/yarn/pnpm) ([`framework`])
//! - **Cache**: Per-run act cache directories ([`cache`])
//! - **Executor**: act invocation and failure classification ([`executor`])
//! - **Orchestrator**: Discovery and execution of a repository's workflows
//!   ([`orchestrator`])
//! - **Report**: JUnit XML parsing and summaries ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use replayci::config::load_config;
//! use replayci::orchestrator::WorkflowSet;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("replayci.toml"))?;
//!     let set = WorkflowSet::discover("/path/to/repo", "python", config.engine.offline)?;
//!     set.save_workflows()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credentials;
pub mod executor;
pub mod framework;
pub mod orchestrator;
pub mod report;
pub mod workflow;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use executor::{Act, ExecutionResult};
pub use orchestrator::{WorkflowSet, WorkflowSetReport};
pub use report::TestCaseRecord;
pub use workflow::{Workflow, WorkflowFactory};
