//! Execution result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use super::error::RunFailure;
use super::options::ExecutionMode;

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Result of a step execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub status: StepStatus,

    /// Tool output, or the boolean outcome of a condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Milliseconds spent in the invocation itself
    pub time_taken: u64,

    /// Present only when `status == failed`, or on deadlocked skips
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// How many times the step has been dispatched in this run
    pub attempts: u32,
}

impl StepResult {
    pub fn succeeded(result: Value, time_taken: u64) -> Self {
        Self {
            status: StepStatus::Succeeded,
            result: Some(result),
            time_taken,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>, time_taken: u64) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error.into()),
            time_taken,
            ..Default::default()
        }
    }

    pub fn skipped(reason: Option<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            error: reason,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One step transition in completion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

/// Everything recorded about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub test_run_id: String,
    pub workflow_id: String,
    pub mode: ExecutionMode,
    pub context: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub step_results: HashMap<String, StepResult>,
    pub completed_steps: BTreeSet<String>,
    pub pending_steps: BTreeSet<String>,
    /// Total wall-clock milliseconds for the run
    pub time_taken: u64,
    pub trace: Vec<TraceEntry>,
    /// Highest number of steps observed running at once
    pub peak_concurrency: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl ExecutionRecord {
    pub fn new(
        test_run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        mode: ExecutionMode,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            test_run_id: test_run_id.into(),
            workflow_id: workflow_id.into(),
            mode,
            context,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Pending,
            step_results: HashMap::new(),
            completed_steps: BTreeSet::new(),
            pending_steps: BTreeSet::new(),
            time_taken: 0,
            trace: Vec::new(),
            peak_concurrency: 0,
            failure: None,
        }
    }

    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.step_results.get(step_id).map(|r| r.status)
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Step ids in the order they reached a terminal status
    pub fn completion_order(&self) -> Vec<&str> {
        self.trace.iter().map(|t| t.step_id.as_str()).collect()
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        let mut failed: Vec<&str> = self
            .step_results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Failed)
            .map(|(id, _)| id.as_str())
            .collect();
        failed.sort();
        failed
    }
}

/// What `execute` hands back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub test_run_id: String,
    pub success: bool,
    pub time_taken: u64,
    pub step_results: HashMap<String, StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl From<&ExecutionRecord> for ExecutionOutcome {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            test_run_id: record.test_run_id.clone(),
            success: record.success(),
            time_taken: record.time_taken,
            step_results: record.step_results.clone(),
            failure: record.failure.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_result_constructors() {
        let ok = StepResult::succeeded(json!({ "ok": true }), 3);
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let failed = StepResult::failed("boom", 1);
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.result.is_none());

        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
    }

    #[test]
    fn test_step_result_serialization() {
        let value = serde_json::to_value(StepResult::succeeded(json!(1), 7)).unwrap();
        assert_eq!(value["status"], json!("succeeded"));
        assert_eq!(value["timeTaken"], json!(7));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_outcome_from_record() {
        let mut record = ExecutionRecord::new("run-1", "wf", ExecutionMode::Mock, Map::new());
        record.status = RunStatus::Failed;
        record
            .step_results
            .insert("a".to_string(), StepResult::failed("boom", 0));
        record.failure = Some(RunFailure::StepsFailed(vec!["a".to_string()]));

        let outcome = ExecutionOutcome::from(&record);
        assert!(!outcome.success);
        assert_eq!(record.failed_steps(), vec!["a"]);
        assert_eq!(outcome.failure, record.failure);
    }
}
