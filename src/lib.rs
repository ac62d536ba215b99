//! # Toolflow
//!
//! A workflow execution engine for tool-calling workflows.
//!
//! ## Features
//!
//! - **Declarative workflows** - Steps that call tools or evaluate conditions, in JSON or YAML
//! - **Two edge kinds** - `dependencies` for DAG ordering, `next`/`onTrue`/`onFalse` pointers for branching and loops
//! - **Bounded concurrency** - Independent steps run in parallel up to `concurrencyLimit`
//! - **Variables** - Capture step results and substitute them with `${name}`
//! - **Mock mode** - Answer tool calls from canned responses
//! - **Run comparison** - Duration statistics across runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::{json, Map};
//! use toolflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = WorkflowStore::new();
//!
//!     store
//!         .register(
//!             WorkflowDefinition::new("checkout")
//!                 .step(StepDefinition::tool("create", "orders.create").capture("order"))
//!                 .step(
//!                     StepDefinition::tool("charge", "payments.charge")
//!                         .depends_on(["create"])
//!                         .params(json!({ "orderId": "${order.id}" })),
//!                 ),
//!         )
//!         .await?;
//!
//!     store.register_mock("orders.create", MockResponse::ok(json!({ "id": "ord_1" }))).await;
//!     store.register_mock("payments.charge", MockResponse::ok(json!({ "status": "paid" }))).await;
//!
//!     let outcome = store.execute("checkout", Map::new(), ExecuteOptions::mock()).await?;
//!     println!("Workflow completed: success={}", outcome.success);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod invoker;
pub mod workflow;

// Re-export main types
pub use engine::{
    ChannelSink, ComparisonReport, EngineError, ExecuteOptions, ExecutionMode, ExecutionOutcome,
    ExecutionRecord, FailurePolicy, MetricsSink, MockResponse, RunFailure, RunStatus, StepGraph,
    StepResult, StepStatus, ValidationError, WorkflowStore,
};
pub use invoker::{HttpInvokerConfig, HttpToolInvoker, ToolError, ToolInvoker, ToolRegistry};
pub use workflow::{
    EngineConfig, LoadError, StepAction, StepDefinition, VariableStore, WorkflowDefinition,
    WorkflowLoader, END,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{
        ChannelSink, ComparisonReport, DuplicatePolicy, EngineError, ExecuteOptions,
        ExecutionMode, ExecutionOutcome, ExecutionRecord, FailurePolicy, MetricsSink,
        MockResponse, RunEvent, RunFailure, RunStatus, StepGraph, StepResult, StepStatus,
        TraceEntry, ValidationError, WorkflowStore,
    };
    pub use crate::invoker::{HttpToolInvoker, ToolError, ToolInvoker, ToolRegistry};
    pub use crate::workflow::{
        EngineConfig, LoadError, StepAction, StepDefinition, WorkflowDefinition, WorkflowLoader,
        END,
    };
}
