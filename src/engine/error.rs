//! Engine error types

use serde::{Deserialize, Serialize};

use crate::invoker::ToolError;
use crate::workflow::expressions::ExpressionError;

/// A workflow definition was rejected at registration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Workflow id must not be empty")]
    MissingWorkflowId,

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Step id '{0}' is reserved")]
    ReservedStepId(String),

    #[error("Step '{step}' depends on non-existent step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' points to non-existent step '{target}'")]
    UnknownTarget { step: String, target: String },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Step '{0}' has no toolId")]
    MissingToolId(String),

    #[error("Step '{0}' has no expression")]
    MissingExpression(String),

    #[error("Condition step '{0}' needs onTrue or onFalse")]
    MissingBranch(String),

    #[error("Concurrency limit must be at least 1, got {0}")]
    InvalidConcurrencyLimit(usize),

    #[error("Workflow has no entry step: every step has an incoming pointer")]
    NoEntryStep,
}

/// A single step failed. Recorded on the step, never raised out of a run.
#[derive(Debug, thiserror::Error)]
pub enum StepExecutionError {
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Condition error: {0}")]
    Expression(ExpressionError),

    #[error("Substitution error: {0}")]
    Substitution(ExpressionError),

    #[error("No mock registered for tool '{0}'")]
    MissingMock(String),

    #[error("No tool invoker configured for tool '{0}'")]
    NoInvoker(String),

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },
}

/// Why a finished run did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "steps", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("Steps failed: {}", .0.join(", "))]
    StepsFailed(Vec<String>),

    #[error("Deadlock: steps reached but never runnable: {}", .0.join(", "))]
    Deadlock(Vec<String>),
}

/// Errors returned by the engine API
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(String),

    #[error("Execution not found: {0}")]
    RunNotFound(String),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),
}
