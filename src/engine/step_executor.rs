//! Step executor
//!
//! Runs a single step and normalizes the outcome into a [`StepResult`].
//! Execution is split in two so the scheduler can substitute variables
//! synchronously and then await the invocation concurrently:
//! 1. `prepare` substitutes `${name}` placeholders into a fresh copy of the
//!    params and evaluates condition expressions
//! 2. `dispatch` calls the mock registry or the tool invoker, with timing
//!
//! The executor never writes to the variable store; output capture is the
//! scheduler's job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::error::StepExecutionError;
use super::options::ExecutionMode;
use super::result::StepResult;
use crate::invoker::ToolInvoker;
use crate::workflow::expressions;
use crate::workflow::{StepAction, StepDefinition, VariableStore};

/// Canned response for a tool in mock mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    /// Value returned as the step result
    #[serde(default)]
    pub result: Value,

    /// Artificial latency before responding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// When set, the mocked call fails with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MockResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = Some(ms);
        self
    }
}

/// Mock responses keyed by tool id
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    responses: HashMap<String, MockResponse>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool_id: impl Into<String>, response: MockResponse) {
        self.responses.insert(tool_id.into(), response);
    }

    pub fn get(&self, tool_id: &str) -> Option<&MockResponse> {
        self.responses.get(tool_id)
    }

    pub fn extend(&mut self, responses: impl IntoIterator<Item = (String, MockResponse)>) {
        self.responses.extend(responses);
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

/// A step ready to dispatch
#[derive(Debug, Clone)]
pub enum PreparedStep {
    /// A tool call with its substituted params
    Tool {
        step_id: String,
        tool_id: String,
        params: Map<String, Value>,
        timeout: Option<Duration>,
    },
    /// Already decided during preparation (conditions, substitution errors)
    Resolved(StepResult),
}

#[derive(Clone)]
pub struct StepExecutor {
    invoker: Option<Arc<dyn ToolInvoker>>,
    mocks: Arc<MockRegistry>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("has_invoker", &self.invoker.is_some())
            .field("mocks", &self.mocks.len())
            .finish()
    }
}

impl StepExecutor {
    pub fn new(invoker: Option<Arc<dyn ToolInvoker>>, mocks: Arc<MockRegistry>) -> Self {
        Self { invoker, mocks }
    }

    /// Execute a step end to end
    pub async fn execute(
        &self,
        step: &StepDefinition,
        vars: &VariableStore,
        mode: ExecutionMode,
    ) -> StepResult {
        let prepared = self.prepare(step, vars, None);
        self.dispatch(prepared, mode).await
    }

    /// Substitute variables and evaluate conditions
    pub fn prepare(
        &self,
        step: &StepDefinition,
        vars: &VariableStore,
        default_timeout: Option<Duration>,
    ) -> PreparedStep {
        match &step.action {
            StepAction::ToolCode {
                tool_id, params, ..
            } => match vars.substitute_params(params) {
                Ok(params) => PreparedStep::Tool {
                    step_id: step.id.clone(),
                    tool_id: tool_id.clone(),
                    params,
                    timeout: step
                        .timeout_ms
                        .map(Duration::from_millis)
                        .or(default_timeout),
                },
                Err(e) => PreparedStep::Resolved(stamped(
                    StepResult::failed(StepExecutionError::Substitution(e).to_string(), 0),
                    Utc::now(),
                )),
            },
            StepAction::Condition { expression, .. } => {
                let started_at = Utc::now();
                let start = Instant::now();
                let outcome = expressions::evaluate(expression, vars);
                let elapsed = elapsed_ms(start);

                let result = match outcome {
                    Ok(value) => {
                        debug!(step = %step.id, outcome = value, "Condition evaluated");
                        StepResult::succeeded(Value::Bool(value), elapsed)
                    }
                    Err(e) => {
                        StepResult::failed(StepExecutionError::Expression(e).to_string(), elapsed)
                    }
                };
                PreparedStep::Resolved(stamped(result, started_at))
            }
        }
    }

    /// Invoke the tool (or mock) for a prepared step
    pub async fn dispatch(&self, prepared: PreparedStep, mode: ExecutionMode) -> StepResult {
        let (step_id, tool_id, params, timeout) = match prepared {
            PreparedStep::Resolved(result) => return result,
            PreparedStep::Tool {
                step_id,
                tool_id,
                params,
                timeout,
            } => (step_id, tool_id, params, timeout),
        };

        let started_at = Utc::now();
        let start = Instant::now();

        let call = self.call(&tool_id, &params, mode);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StepExecutionError::Timeout {
                    step: step_id.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => call.await,
        };
        let elapsed = elapsed_ms(start);

        let result = match outcome {
            Ok(value) => StepResult::succeeded(value, elapsed),
            Err(e) => {
                debug!(step = %step_id, tool = %tool_id, error = %e, "Step failed");
                StepResult::failed(e.to_string(), elapsed)
            }
        };
        stamped(result, started_at)
    }

    async fn call(
        &self,
        tool_id: &str,
        params: &Map<String, Value>,
        mode: ExecutionMode,
    ) -> Result<Value, StepExecutionError> {
        match mode {
            ExecutionMode::Mock => {
                let mock = self
                    .mocks
                    .get(tool_id)
                    .ok_or_else(|| StepExecutionError::MissingMock(tool_id.to_string()))?;
                if let Some(ms) = mock.delay_ms {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                match &mock.error {
                    Some(message) => Err(StepExecutionError::Tool(
                        crate::invoker::ToolError::Failed(message.clone()),
                    )),
                    None => Ok(mock.result.clone()),
                }
            }
            ExecutionMode::Real => {
                let invoker = self
                    .invoker
                    .as_ref()
                    .ok_or_else(|| StepExecutionError::NoInvoker(tool_id.to_string()))?;
                Ok(invoker.invoke(tool_id, params).await?)
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn stamped(mut result: StepResult, started_at: chrono::DateTime<Utc>) -> StepResult {
    result.started_at = Some(started_at);
    result.finished_at = Some(Utc::now());
    result
}
