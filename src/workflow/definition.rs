//! Workflow and step definitions
//!
//! A workflow is an ordered list of steps. Steps are linked in two ways:
//! - dependency edges (`dependencies`), which must form a DAG
//! - pointer edges (`next`, `onTrue`, `onFalse`), which may loop
//!
//! ```yaml
//! id: checkout
//! concurrencyLimit: 2
//! steps:
//!   - id: charge
//!     type: tool_code
//!     toolId: payments.charge
//!     params:
//!       amount: "${amount}"
//!     capture: charge
//!     next: check
//!   - id: check
//!     type: condition
//!     expression: "${charge.status} == 'paid'"
//!     onTrue: notify
//!     onFalse: end
//!   - id: notify
//!     type: tool_code
//!     toolId: sms.send
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pointer target that terminates the current branch
pub const END: &str = "end";

fn default_concurrency_limit() -> usize {
    1
}

/// A complete workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique workflow id
    #[serde(default)]
    pub id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Maximum number of steps running at once
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Steps in definition order (the scheduling tie-break order)
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            concurrency_limit: default_concurrency_limit(),
            steps: Vec::new(),
        }
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn get_step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// A single unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Step id, unique within its workflow
    pub id: String,

    /// What the step does
    #[serde(flatten)]
    pub action: StepAction,

    /// Steps that must succeed before this one is eligible
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Variable that receives this step's result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,

    /// Per-step timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Step behaviour, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Invoke a tool
    #[serde(rename_all = "camelCase")]
    ToolCode {
        #[serde(default)]
        tool_id: String,
        #[serde(default)]
        params: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<String>,
    },

    /// Evaluate a boolean expression against the run's variables
    #[serde(rename_all = "camelCase")]
    Condition {
        #[serde(default)]
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_true: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_false: Option<String>,
    },
}

/// Step type name, as it appears in `type:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCode,
    Condition,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::ToolCode => write!(f, "tool_code"),
            StepKind::Condition => write!(f, "condition"),
        }
    }
}

impl StepDefinition {
    /// Create a `tool_code` step
    pub fn tool(id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: StepAction::ToolCode {
                tool_id: tool_id.into(),
                params: Map::new(),
                next: None,
            },
            dependencies: Vec::new(),
            capture: None,
            timeout_ms: None,
        }
    }

    /// Create a `condition` step
    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: StepAction::Condition {
                expression: expression.into(),
                on_true: None,
                on_false: None,
            },
            dependencies: Vec::new(),
            capture: None,
            timeout_ms: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set the `next` pointer (ignored on condition steps)
    pub fn next(mut self, target: impl Into<String>) -> Self {
        if let StepAction::ToolCode { next, .. } = &mut self.action {
            *next = Some(target.into());
        }
        self
    }

    pub fn on_true(mut self, target: impl Into<String>) -> Self {
        if let StepAction::Condition { on_true, .. } = &mut self.action {
            *on_true = Some(target.into());
        }
        self
    }

    pub fn on_false(mut self, target: impl Into<String>) -> Self {
        if let StepAction::Condition { on_false, .. } = &mut self.action {
            *on_false = Some(target.into());
        }
        self
    }

    /// Set tool params from a JSON object; non-object values are ignored
    pub fn params(mut self, value: Value) -> Self {
        if let (StepAction::ToolCode { params, .. }, Value::Object(map)) = (&mut self.action, value)
        {
            *params = map;
        }
        self
    }

    pub fn capture(mut self, variable: impl Into<String>) -> Self {
        self.capture = Some(variable.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::ToolCode { .. } => StepKind::ToolCode,
            StepAction::Condition { .. } => StepKind::Condition,
        }
    }

    pub fn tool_id(&self) -> Option<&str> {
        match &self.action {
            StepAction::ToolCode { tool_id, .. } => Some(tool_id.as_str()),
            StepAction::Condition { .. } => None,
        }
    }

    /// All pointer targets of this step, including `end`
    pub fn pointer_targets(&self) -> Vec<&str> {
        match &self.action {
            StepAction::ToolCode { next, .. } => next.iter().map(|s| s.as_str()).collect(),
            StepAction::Condition {
                on_true, on_false, ..
            } => on_true
                .iter()
                .chain(on_false.iter())
                .map(|s| s.as_str())
                .collect(),
        }
    }
}
