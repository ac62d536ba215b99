//! Comparison reporter
//!
//! Aggregates timings across finished runs. Missing or unfinished runs are
//! reported as warnings and left out of the numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::result::{ExecutionRecord, StepStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

impl DurationStats {
    fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let sum: u64 = samples.iter().sum();
        Self {
            min: samples.iter().copied().min().unwrap_or_default(),
            max: samples.iter().copied().max().unwrap_or_default(),
            avg: sum as f64 / samples.len() as f64,
        }
    }
}

/// Timing of one step id across the compared runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepComparison {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
    /// `max - min`
    pub delta: u64,
    /// Number of runs that executed the step
    pub runs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub label: String,
    pub generated_at: DateTime<Utc>,
    /// Runs included in the numbers
    pub run_ids: Vec<String>,
    pub duration: DurationStats,
    /// Fraction of included runs that succeeded
    pub success_rate: f64,
    pub steps: BTreeMap<String, StepComparison>,
    pub warnings: Vec<String>,
}

/// Build a report from the records that were found. `missing` lists the
/// requested run ids that had no record.
pub fn compare(label: &str, records: &[ExecutionRecord], missing: &[String]) -> ComparisonReport {
    let mut warnings: Vec<String> = missing
        .iter()
        .map(|id| format!("Execution not found: {}", id))
        .collect();

    let mut finished = Vec::new();
    for record in records {
        if record.status.is_finished() {
            finished.push(record);
        } else {
            warnings.push(format!(
                "Execution {} is still {}, excluded",
                record.test_run_id, record.status
            ));
        }
    }

    if finished.is_empty() {
        warnings.push("No finished executions to compare".to_string());
    }

    let durations: Vec<u64> = finished.iter().map(|r| r.time_taken).collect();
    let succeeded = finished.iter().filter(|r| r.success()).count();
    let success_rate = if finished.is_empty() {
        0.0
    } else {
        succeeded as f64 / finished.len() as f64
    };

    let mut samples: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for record in &finished {
        for (step_id, result) in &record.step_results {
            if matches!(result.status, StepStatus::Succeeded | StepStatus::Failed) {
                samples
                    .entry(step_id.as_str())
                    .or_default()
                    .push(result.time_taken);
            }
        }
    }

    let steps = samples
        .into_iter()
        .filter(|(_, times)| times.len() >= 2)
        .map(|(step_id, times)| {
            let stats = DurationStats::from_samples(&times);
            (
                step_id.to_string(),
                StepComparison {
                    min: stats.min,
                    max: stats.max,
                    avg: stats.avg,
                    delta: stats.max - stats.min,
                    runs: times.len(),
                },
            )
        })
        .collect();

    ComparisonReport {
        label: label.to_string(),
        generated_at: Utc::now(),
        run_ids: finished.iter().map(|r| r.test_run_id.clone()).collect(),
        duration: DurationStats::from_samples(&durations),
        success_rate,
        steps,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::options::ExecutionMode;
    use crate::engine::result::{RunStatus, StepResult};
    use serde_json::{json, Map};

    fn record(id: &str, time_taken: u64, status: RunStatus, steps: &[(&str, u64)]) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(id, "wf", ExecutionMode::Mock, Map::new());
        record.status = status;
        record.time_taken = time_taken;
        for (step, ms) in steps {
            record
                .step_results
                .insert(step.to_string(), StepResult::succeeded(json!(null), *ms));
        }
        record
    }

    #[test]
    fn test_duration_min_max() {
        let runs = vec![
            record("run1", 10, RunStatus::Succeeded, &[("a", 4)]),
            record("run2", 50, RunStatus::Succeeded, &[("a", 30)]),
        ];

        let report = compare("baseline", &runs, &[]);

        assert_eq!(report.duration.min, 10);
        assert_eq!(report.duration.max, 50);
        assert_eq!(report.duration.avg, 30.0);
        assert_eq!(report.success_rate, 1.0);
        assert_eq!(report.steps["a"].delta, 26);
        assert_eq!(report.steps["a"].runs, 2);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_and_running_runs_are_warnings() {
        let runs = vec![
            record("run1", 10, RunStatus::Failed, &[("a", 1), ("b", 2)]),
            record("run2", 20, RunStatus::Succeeded, &[("a", 3)]),
            record("run3", 0, RunStatus::Running, &[]),
        ];

        let report = compare("mixed", &runs, &["ghost".to_string()]);

        assert_eq!(report.run_ids, vec!["run1", "run2"]);
        assert_eq!(report.success_rate, 0.5);
        assert!(report.steps.contains_key("a"));
        // b ran only once
        assert!(!report.steps.contains_key("b"));
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("ghost"));
        assert!(report.warnings[1].contains("run3 is still running"));
    }

    #[test]
    fn test_empty_comparison() {
        let report = compare("none", &[], &[]);
        assert_eq!(report.duration, DurationStats::default());
        assert_eq!(report.warnings, vec!["No finished executions to compare"]);
    }
}
