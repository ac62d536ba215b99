//! Metrics and reporting sink
//!
//! The engine records raw per-step and per-run data and hands it to a
//! [`MetricsSink`]. Formatting reports is left to whatever sits behind it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::result::{ExecutionRecord, StepResult, StepStatus};

/// Receives step and run completions. Called from the scheduler task, so
/// implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn on_step_completed(&self, _run_id: &str, _step_id: &str, _result: &StepResult) {}

    fn on_run_completed(&self, _record: &ExecutionRecord) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    StepCompleted,
    RunCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub event_type: EventType,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunEvent {
    pub fn step_completed(run_id: &str, step_id: &str, result: &StepResult) -> Self {
        Self {
            event_type: EventType::StepCompleted,
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            workflow_id: None,
            step_id: Some(step_id.to_string()),
            status: Some(result.status),
            success: Some(result.is_success()),
            time_taken: Some(result.time_taken),
            error: result.error.clone(),
        }
    }

    pub fn run_completed(record: &ExecutionRecord) -> Self {
        Self {
            event_type: EventType::RunCompleted,
            run_id: record.test_run_id.clone(),
            timestamp: Utc::now(),
            workflow_id: Some(record.workflow_id.clone()),
            step_id: None,
            status: None,
            success: Some(record.success()),
            time_taken: Some(record.time_taken),
            error: record.failure.as_ref().map(|f| f.to_string()),
        }
    }
}

/// Forwards events over a bounded channel. Events are dropped when the
/// channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    event_tx: mpsc::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        (Self { event_tx }, event_rx)
    }

    fn send_event(&self, event: RunEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            let reason = match &e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            let event = e.into_inner();
            debug!(
                run_id = %event.run_id,
                event_type = ?event.event_type,
                reason,
                "Dropped run event"
            );
        }
    }
}

impl MetricsSink for ChannelSink {
    fn on_step_completed(&self, run_id: &str, step_id: &str, result: &StepResult) {
        self.send_event(RunEvent::step_completed(run_id, step_id, result));
    }

    fn on_run_completed(&self, record: &ExecutionRecord) {
        self.send_event(RunEvent::run_completed(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::options::ExecutionMode;
    use serde_json::{json, Map};

    #[test]
    fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new(8);
        sink.on_step_completed("run-1", "a", &StepResult::succeeded(json!(1), 4));

        let record = ExecutionRecord::new("run-1", "wf", ExecutionMode::Mock, Map::new());
        sink.on_run_completed(&record);

        let step = rx.try_recv().unwrap();
        assert_eq!(step.event_type, EventType::StepCompleted);
        assert_eq!(step.step_id.as_deref(), Some("a"));
        assert_eq!(step.time_taken, Some(4));

        let run = rx.try_recv().unwrap();
        assert_eq!(run.event_type, EventType::RunCompleted);
        assert_eq!(run.workflow_id.as_deref(), Some("wf"));

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["eventType"], json!("STEP_COMPLETED"));
        assert_eq!(json["status"], json!("succeeded"));
    }

    #[test]
    fn test_full_channel_drops_events() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.on_step_completed("run-1", "a", &StepResult::succeeded(json!(1), 0));
        sink.on_step_completed("run-1", "b", &StepResult::succeeded(json!(1), 0));

        assert_eq!(rx.try_recv().unwrap().step_id.as_deref(), Some("a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.on_step_completed("run-1", "a", &StepResult::succeeded(json!(1), 0));

        let record = ExecutionRecord::new("run-1", "wf", ExecutionMode::Mock, Map::new());
        sink.on_run_completed(&record);
    }
}
