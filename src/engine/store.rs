//! Workflow store
//!
//! The caller-owned engine handle. Holds registered workflows with their
//! validated graphs, the mock registry, and every execution record until the
//! caller discards it. Independent stores share nothing.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use super::comparison::{self, ComparisonReport};
use super::error::EngineError;
use super::events::MetricsSink;
use super::graph::StepGraph;
use super::options::{DuplicatePolicy, ExecuteOptions};
use super::result::{ExecutionOutcome, ExecutionRecord};
use super::scheduler::Scheduler;
use super::step_executor::{MockRegistry, MockResponse, StepExecutor};
use crate::invoker::{HttpToolInvoker, ToolError, ToolInvoker};
use crate::workflow::{EngineConfig, WorkflowDefinition};

struct RegisteredWorkflow {
    definition: Arc<WorkflowDefinition>,
    graph: Arc<StepGraph>,
}

#[derive(Default)]
pub struct WorkflowStore {
    workflows: RwLock<HashMap<String, RegisteredWorkflow>>,
    executions: RwLock<HashMap<String, Arc<RwLock<ExecutionRecord>>>>,
    mocks: RwLock<MockRegistry>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    sink: Option<Arc<dyn MetricsSink>>,
    duplicate_policy: DuplicatePolicy,
    /// Variables every run starts with, under the caller's context
    base_context: Map<String, Value>,
}

impl std::fmt::Debug for WorkflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStore")
            .field("has_invoker", &self.invoker.is_some())
            .field("has_sink", &self.sink.is_some())
            .field("duplicate_policy", &self.duplicate_policy)
            .finish()
    }
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an engine config: mocks, HTTP invoker, base context
    pub fn from_config(config: &EngineConfig) -> Result<Self, ToolError> {
        let mut mocks = MockRegistry::new();
        mocks.extend(config.mocks.clone());

        let invoker: Option<Arc<dyn ToolInvoker>> = match &config.invoker {
            Some(http) => Some(Arc::new(HttpToolInvoker::from_config(http)?)),
            None => None,
        };

        Ok(Self {
            mocks: RwLock::new(mocks),
            invoker,
            duplicate_policy: config.duplicate_workflows,
            base_context: config.context.clone(),
            ..Default::default()
        })
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Validate and register a workflow. Returns its id.
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id))]
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<String, EngineError> {
        let graph = StepGraph::build(&definition)?;

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&definition.id) {
            if self.duplicate_policy == DuplicatePolicy::Reject {
                return Err(EngineError::DuplicateWorkflow(definition.id));
            }
            info!("Replacing registered workflow");
        }

        let id = definition.id.clone();
        info!(
            steps = graph.len(),
            entry = ?graph.entry_set(),
            "Registered workflow"
        );
        workflows.insert(
            id.clone(),
            RegisteredWorkflow {
                definition: Arc::new(definition),
                graph: Arc::new(graph),
            },
        );
        Ok(id)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .map(|w| w.definition.clone())
    }

    pub async fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a canned response for `tool_id`, used in mock mode
    pub async fn register_mock(&self, tool_id: impl Into<String>, response: MockResponse) {
        self.mocks.write().await.register(tool_id, response);
    }

    /// Execute a registered workflow to completion.
    ///
    /// Errors only for an unknown workflow or invalid options. A failed run is
    /// reported through the outcome.
    #[instrument(skip(self, context, options))]
    pub async fn execute(
        &self,
        workflow_id: &str,
        context: Map<String, Value>,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        if options.concurrency_limit == Some(0) {
            return Err(EngineError::InvalidOverride(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let graph = self
            .workflows
            .read()
            .await
            .get(workflow_id)
            .map(|w| w.graph.clone())
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut run_context = self.base_context.clone();
        run_context.extend(context);

        let run_id = uuid::Uuid::new_v4().to_string();
        let record = Arc::new(RwLock::new(ExecutionRecord::new(
            run_id.clone(),
            workflow_id,
            options.mode,
            run_context,
        )));
        self.executions
            .write()
            .await
            .insert(run_id.clone(), record.clone());

        // Mocks registered after this point do not affect the run
        let mocks = Arc::new(self.mocks.read().await.clone());
        let executor = StepExecutor::new(self.invoker.clone(), mocks);
        let scheduler = Scheduler::new(graph, executor, options).with_sink(self.sink.clone());

        Ok(scheduler.run(record).await)
    }

    /// Snapshot of a run, valid while it is running and after
    pub async fn get_execution(&self, run_id: &str) -> Result<ExecutionRecord, EngineError> {
        let record = self
            .executions
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let snapshot = record.read().await.clone();
        Ok(snapshot)
    }

    /// Snapshots of all runs, optionally of one workflow, oldest first
    pub async fn list_executions(&self, workflow_id: Option<&str>) -> Vec<ExecutionRecord> {
        let handles: Vec<_> = self.executions.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = handle.read().await;
            if workflow_id.map_or(true, |id| record.workflow_id == id) {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    /// Drop a run's record
    pub async fn discard_execution(&self, run_id: &str) -> Result<(), EngineError> {
        self.executions
            .write()
            .await
            .remove(run_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))
    }

    /// Compare runs by id. Unknown ids become warnings in the report.
    pub async fn compare_executions(&self, run_ids: &[String], label: &str) -> ComparisonReport {
        let mut records = Vec::new();
        let mut missing = Vec::new();
        for run_id in run_ids {
            match self.get_execution(run_id).await {
                Ok(record) => records.push(record),
                Err(_) => missing.push(run_id.clone()),
            }
        }
        comparison::compare(label, &records, &missing)
    }
}
