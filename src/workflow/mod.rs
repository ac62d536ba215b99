//! Workflow types and definitions
//!
//! This module contains everything that describes a workflow before it runs:
//! - `definition` - WorkflowDefinition, StepDefinition and StepAction
//! - `variables` - VariableStore and `${name}` substitution
//! - `expressions` - Condition expression evaluation
//! - `loader` - Load workflows from files and directories
//! - `engine_config` - EngineConfig loaded from toolflow.yaml

pub mod definition;
pub mod engine_config;
pub mod expressions;
pub mod loader;
pub mod variables;

pub use definition::{StepAction, StepDefinition, StepKind, WorkflowDefinition, END};
pub use engine_config::EngineConfig;
pub use expressions::{evaluate as evaluate_condition, ExpressionError};
pub use loader::{LoadError, WorkflowLoader};
pub use variables::VariableStore;
