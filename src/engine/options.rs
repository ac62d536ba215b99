//! Per-run execution options

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether tools are called for real or answered from the mock registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Mock,
    Real,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(ExecutionMode::Mock),
            "real" => Ok(ExecutionMode::Real),
            other => Err(format!("unknown mode '{}', expected mock or real", other)),
        }
    }
}

/// What a failed step means for the run as a whole
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed step fails the run
    #[default]
    FailRun,
    /// The run succeeds with failed and skipped steps recorded
    Tolerate,
}

/// How `register` treats an id that is already registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Overwrite,
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub mode: ExecutionMode,
    /// Replaces the workflow's `concurrencyLimit` for this run
    pub concurrency_limit: Option<usize>,
    pub failure_policy: FailurePolicy,
    /// Default per-step timeout
    pub step_timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn mock() -> Self {
        Self::default()
    }

    pub fn real() -> Self {
        Self {
            mode: ExecutionMode::Real,
            ..Self::default()
        }
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }
}
