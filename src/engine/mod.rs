//! Workflow execution engine module
//!
//! This module contains:
//! - `graph` - Step graph builder and validation
//! - `scheduler` - Per-run state machine
//! - `step_executor` - Single step execution and the mock registry
//! - `store` - WorkflowStore, the caller-owned engine handle
//! - `result` - Step results and execution records
//! - `comparison` - Cross-run comparison reports
//! - `events` - Metrics sink and run events
//! - `options` - Per-run execution options
//! - `error` - Engine error types

pub mod comparison;
pub mod error;
pub mod events;
pub mod graph;
pub mod options;
pub mod result;
pub mod scheduler;
pub mod step_executor;
pub mod store;

pub use comparison::{compare, ComparisonReport, DurationStats, StepComparison};
pub use error::{EngineError, RunFailure, StepExecutionError, ValidationError};
pub use events::{ChannelSink, EventType, MetricsSink, RunEvent};
pub use graph::{StepGraph, StepNode};
pub use options::{DuplicatePolicy, ExecuteOptions, ExecutionMode, FailurePolicy};
pub use result::{
    ExecutionOutcome, ExecutionRecord, RunStatus, StepResult, StepStatus, TraceEntry,
};
pub use scheduler::Scheduler;
pub use step_executor::{MockRegistry, MockResponse, PreparedStep, StepExecutor};
pub use store::WorkflowStore;
