//! Classification of finished runs.

use std::fmt;

use super::ExecutionResult;

/// Exit code of `timeout` when the deadline expired.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Decides whether a finished run counts as failed.
pub trait FailureStrategy: Send + Sync + fmt::Debug {
    fn failed(&self, run: &ExecutionResult) -> bool;
}

/// Failure as seen by the tests, ignoring sandbox memory kills.
///
/// act exits with 1 whatever the container's exit code was, so a container
/// killed for exceeding its memory limit is only visible through the
/// `exitcode '137'` marker in act's output. Such runs say nothing about
/// the tests and are not failed. Timeouts and erroring tests always are.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestsFailureStrategy;

impl TestsFailureStrategy {
    fn out_of_memory(run: &ExecutionResult) -> bool {
        run.stderr.contains("exitcode '137'") || run.stdout.contains("exitcode '137': failure")
    }
}

impl FailureStrategy for TestsFailureStrategy {
    fn failed(&self, run: &ExecutionResult) -> bool {
        if run.return_code == TIMEOUT_EXIT_CODE || !run.erroring_tests().is_empty() {
            return true;
        }
        if run.return_code == 1 && Self::out_of_memory(run) {
            return false;
        }
        run.return_code != 0
    }
}

/// Failed iff act exited non-zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitCodeFailureStrategy;

impl FailureStrategy for ExitCodeFailureStrategy {
    fn failed(&self, run: &ExecutionResult) -> bool {
        run.return_code != 0
    }
}
