//! Command-backed test gate.

use super::TestGate;
use crate::config::TestConfig;
use crate::context::RunContext;
use crate::domain::{ExecutionEnvironment, TestResult, TestSummary};
use crate::error::TestFailureReason;
use crate::process::run_shell;
use async_trait::async_trait;
use tracing::{info, warn};

const DIAGNOSTIC_LINES: usize = 40;

/// Runs the configured test command. Exit 0 passes; the runner's summary
/// line, when present, supplies counts.
pub struct CommandTestGate {
    config: TestConfig,
}

impl CommandTestGate {
    pub fn new(config: TestConfig) -> Self {
        Self { config }
    }

    fn no_tests(&self, diagnostics: String) -> TestResult {
        if self.config.allow_empty {
            warn!("no tests collected; allowed by configuration");
            TestResult::passed(Some(0))
        } else {
            TestResult::failed(TestFailureReason::NoTestsCollected, 1, Some(diagnostics))
        }
    }
}

#[async_trait]
impl TestGate for CommandTestGate {
    async fn run_tests(&self, ctx: &RunContext, env: &ExecutionEnvironment) -> TestResult {
        let vars = ctx.command_env(&env.env_vars);
        let output = match run_shell(&self.config.command, ctx.workdir(), &vars).await {
            Ok(output) => output,
            Err(e) => {
                return TestResult::failed(
                    TestFailureReason::RunnerCrashed,
                    1,
                    Some(format!("failed to start '{}': {e}", self.config.command)),
                )
            }
        };

        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let summary = TestSummary::parse(&combined);
        let tests_run = summary.map(|s| s.total());
        let diagnostics = output.tail(DIAGNOSTIC_LINES);

        let result = match output.exit_code {
            None => TestResult::failed(
                TestFailureReason::RunnerCrashed,
                1,
                Some(format!("test runner killed by signal\n{diagnostics}")),
            ),
            Some(code) if self.config.no_tests_exit_code == Some(code) => self.no_tests(diagnostics),
            Some(0) if tests_run == Some(0) => self.no_tests(diagnostics),
            Some(0) => TestResult::passed(tests_run),
            Some(_) => {
                let failures = summary.map(|s| s.failing()).unwrap_or(1);
                TestResult::failed(TestFailureReason::FailingTests, failures, Some(diagnostics))
                    .with_tests_run(tests_run)
            }
        };

        info!(
            passed = result.passed,
            failures = result.failures,
            tests_run = ?result.tests_run,
            duration_ms = output.duration_ms,
            "test suite finished"
        );
        result
    }
}
