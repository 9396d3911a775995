//! Test gate results.

use crate::error::{TestFailure, TestFailureReason};
use serde::{Deserialize, Serialize};

/// Aggregate outcome of one test-suite execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    /// Number of failing tests (at least 1 when `passed` is false)
    pub failures: u32,
    /// Tests executed, when the runner's summary could be read
    pub tests_run: Option<u32>,
    /// Set when `passed` is false
    pub reason: Option<TestFailureReason>,
    /// Tail of the runner's output
    pub diagnostics: Option<String>,
}

impl TestResult {
    pub fn passed(tests_run: Option<u32>) -> Self {
        Self {
            passed: true,
            failures: 0,
            tests_run,
            reason: None,
            diagnostics: None,
        }
    }

    pub fn failed(reason: TestFailureReason, failures: u32, diagnostics: Option<String>) -> Self {
        Self {
            passed: false,
            failures: failures.max(1),
            tests_run: None,
            reason: Some(reason),
            diagnostics,
        }
    }

    pub fn with_tests_run(mut self, tests_run: Option<u32>) -> Self {
        self.tests_run = tests_run;
        self
    }

    /// Convert a failing result into the pipeline error, `None` when passed.
    pub fn into_failure(self) -> Option<TestFailure> {
        if self.passed {
            return None;
        }
        Some(TestFailure {
            count: self.failures,
            reason: self.reason.unwrap_or(TestFailureReason::FailingTests),
            diagnostics: self.diagnostics,
        })
    }
}

/// Counts read from a test runner's closing summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestSummary {
    /// Read pytest-style summaries such as
    /// `==== 3 failed, 7 passed, 1 error in 0.52s ====` or `no tests ran`.
    ///
    /// Scans from the bottom; returns the first line holding any count.
    pub fn parse(output: &str) -> Option<Self> {
        for line in output.lines().rev() {
            let lower = line.to_ascii_lowercase();
            if lower.contains("no tests ran") {
                return Some(Self::default());
            }

            let mut summary = Self::default();
            let mut found = false;
            let tokens: Vec<&str> = lower
                .split(|c: char| c.is_whitespace() || c == ',' || c == '=')
                .filter(|t| !t.is_empty())
                .collect();
            for pair in tokens.windows(2) {
                let Ok(n) = pair[0].parse::<u32>() else {
                    continue;
                };
                let slot = match pair[1] {
                    "passed" => &mut summary.passed,
                    "failed" => &mut summary.failed,
                    "error" | "errors" => &mut summary.errors,
                    "skipped" => &mut summary.skipped,
                    _ => continue,
                };
                *slot += n;
                found = true;
            }
            if found {
                return Some(summary);
            }
        }
        None
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.errors
    }

    pub fn failing(&self) -> u32 {
        self.failed + self.errors
    }
}
