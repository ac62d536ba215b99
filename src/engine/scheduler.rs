//! Scheduler
//!
//! Drives one run of a workflow over its [`StepGraph`]:
//! - Seeds the ready queue with the entry set
//! - Dispatches ready steps in definition order, up to the concurrency limit
//! - Applies completions one at a time: output capture, pointer transitions,
//!   dependent unlocking, skip propagation
//! - Detects runs that stall with pointer-reached steps whose dependencies
//!   can never be met
//!
//! All mutation of a run's variables and record happens on the scheduler's
//! own task. Steps that finish together are applied in definition order.

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Map;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::RunFailure;
use super::events::MetricsSink;
use super::graph::{StepGraph, StepNode};
use super::options::{ExecuteOptions, FailurePolicy};
use super::result::{
    ExecutionOutcome, ExecutionRecord, RunStatus, StepResult, StepStatus, TraceEntry,
};
use super::step_executor::StepExecutor;
use crate::workflow::expressions::is_truthy;
use crate::workflow::{StepAction, VariableStore, END};

type StepFuture = BoxFuture<'static, (usize, StepResult)>;

/// Scheduler-side state of a step. Finer grained than [`StepStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    /// Reached by a pointer, waiting on dependencies
    Awaiting,
    Ready,
    /// `rearm` is set when a pointer arrives while the step is running
    Running { rearm: bool },
    Finished(StepStatus),
}

pub struct Scheduler {
    graph: Arc<StepGraph>,
    executor: StepExecutor,
    options: ExecuteOptions,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl Scheduler {
    pub fn new(graph: Arc<StepGraph>, executor: StepExecutor, options: ExecuteOptions) -> Self {
        Self {
            graph,
            executor,
            options,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn MetricsSink>>) -> Self {
        self.sink = sink;
        self
    }

    /// Concurrency limit in effect for this run
    pub fn concurrency_limit(&self) -> usize {
        self.options
            .concurrency_limit
            .unwrap_or_else(|| self.graph.concurrency_limit())
            .max(1)
    }

    /// Run the workflow to completion, updating `record` as steps progress
    pub async fn run(&self, record: Arc<RwLock<ExecutionRecord>>) -> ExecutionOutcome {
        let run_id = record.read().await.test_run_id.clone();
        let span = info_span!(
            "run",
            workflow_id = %self.graph.workflow_id(),
            run_id = %run_id
        );
        self.drive(record).instrument(span).await
    }

    async fn drive(&self, record: Arc<RwLock<ExecutionRecord>>) -> ExecutionOutcome {
        let start = Instant::now();
        let limit = self.concurrency_limit();

        let mut run = {
            let mut rec = record.write().await;
            rec.status = RunStatus::Running;
            rec.started_at = Utc::now();
            for node in self.graph.nodes() {
                rec.pending_steps.insert(node.step.id.clone());
                rec.step_results
                    .insert(node.step.id.clone(), StepResult::default());
            }
            Run::new(self, &rec.context)
        };

        info!(
            steps = self.graph.len(),
            concurrency = limit,
            mode = ?self.options.mode,
            "Run started"
        );

        loop {
            {
                let mut rec = record.write().await;
                run.fill(limit, &mut rec);
            }

            let Some(first) = run.in_flight.next().await else {
                break;
            };

            // Apply everything that finished together in definition order
            let mut batch = vec![first];
            while let Some(Some(done)) = run.in_flight.next().now_or_never() {
                batch.push(done);
            }
            batch.sort_by_key(|(index, _)| *index);

            let mut rec = record.write().await;
            for (index, result) in batch {
                run.complete(index, result, &mut rec);
            }
        }

        let mut rec = record.write().await;
        run.finalize(&mut rec, start.elapsed().as_millis() as u64);
        ExecutionOutcome::from(&*rec)
    }
}

/// Mutable state for one run
struct Run<'a> {
    scheduler: &'a Scheduler,
    slots: Vec<Slot>,
    attempts: Vec<u32>,
    ready: VecDeque<usize>,
    vars: VariableStore,
    in_flight: FuturesUnordered<StepFuture>,
}

impl<'a> Run<'a> {
    fn new(scheduler: &'a Scheduler, context: &Map<String, serde_json::Value>) -> Self {
        let graph = &scheduler.graph;
        let mut vars = VariableStore::from_context(context);
        for node in graph.nodes() {
            if let Some(variable) = &node.step.capture {
                vars.bind_capture(&node.step.id, variable);
            }
        }

        let mut slots = vec![Slot::Pending; graph.len()];
        let mut ready = VecDeque::new();
        for &entry in graph.entry_indices() {
            slots[entry] = Slot::Ready;
            ready.push_back(entry);
        }

        Self {
            scheduler,
            slots,
            attempts: vec![0; graph.len()],
            ready,
            vars,
            in_flight: FuturesUnordered::new(),
        }
    }

    fn graph(&self) -> &'a StepGraph {
        &self.scheduler.graph
    }

    /// Dispatch ready steps until the concurrency window is full
    fn fill(&mut self, limit: usize, rec: &mut ExecutionRecord) {
        while self.in_flight.len() < limit {
            let Some(index) = self.ready.pop_front() else {
                break;
            };
            self.dispatch(index, rec);
        }
        rec.peak_concurrency = rec.peak_concurrency.max(self.in_flight.len());
    }

    fn dispatch(&mut self, index: usize, rec: &mut ExecutionRecord) {
        let node = self.graph().node(index);
        let prepared = self.scheduler.executor.prepare(
            &node.step,
            &self.vars,
            self.scheduler.options.step_timeout,
        );

        self.slots[index] = Slot::Running { rearm: false };
        rec.step_results.insert(
            node.step.id.clone(),
            StepResult {
                status: StepStatus::Running,
                started_at: Some(Utc::now()),
                attempts: self.attempts[index] + 1,
                ..Default::default()
            },
        );
        debug!(step = %node.step.id, kind = %node.step.kind(), "Dispatching step");

        let executor = self.scheduler.executor.clone();
        let mode = self.scheduler.options.mode;
        self.in_flight.push(Box::pin(async move {
            (index, executor.dispatch(prepared, mode).await)
        }));
    }

    fn complete(&mut self, index: usize, mut result: StepResult, rec: &mut ExecutionRecord) {
        let graph = self.graph();
        let node = graph.node(index);
        let rearm = matches!(self.slots[index], Slot::Running { rearm: true });

        self.attempts[index] += 1;
        result.attempts = self.attempts[index];

        let succeeded = result.is_success();
        if succeeded {
            if let Some(value) = &result.result {
                if let Some(variable) = self.vars.capture(&node.step.id, value) {
                    debug!(step = %node.step.id, variable = %variable, "Captured step output");
                }
            }
        }

        let target = if succeeded {
            pointer_target(node, &result).and_then(|t| graph.index_of(t))
        } else {
            None
        };

        self.finish(index, result, rec);

        let mut newly_ready = Vec::new();
        if succeeded {
            if let Some(target) = target {
                self.arrive(target, &mut newly_ready);
            }
            for &dependent in &node.dependents {
                if self.unlockable(dependent) {
                    self.slots[dependent] = Slot::Ready;
                    newly_ready.push(dependent);
                }
            }
        } else {
            self.skip_dependents(index, rec);
        }

        if rearm {
            self.arrive(index, &mut newly_ready);
        }

        newly_ready.sort_unstable();
        self.ready.extend(newly_ready);
    }

    /// A pointer transition reached `index`
    fn arrive(&mut self, index: usize, newly_ready: &mut Vec<usize>) {
        match self.slots[index] {
            Slot::Ready | Slot::Awaiting | Slot::Finished(StepStatus::Skipped) => {}
            Slot::Running { .. } => self.slots[index] = Slot::Running { rearm: true },
            Slot::Pending | Slot::Finished(_) => {
                if self.dependencies_met(index) {
                    self.slots[index] = Slot::Ready;
                    newly_ready.push(index);
                } else {
                    debug!(
                        step = %self.graph().node(index).step.id,
                        "Reached by pointer, waiting on dependencies"
                    );
                    self.slots[index] = Slot::Awaiting;
                }
            }
        }
    }

    fn dependencies_met(&self, index: usize) -> bool {
        self.graph()
            .node(index)
            .dependencies
            .iter()
            .all(|&d| self.slots[d] == Slot::Finished(StepStatus::Succeeded))
    }

    fn unlockable(&self, index: usize) -> bool {
        let waiting = match self.slots[index] {
            Slot::Pending => !self.graph().node(index).has_incoming_pointer,
            Slot::Awaiting => true,
            _ => false,
        };
        waiting && self.dependencies_met(index)
    }

    /// Skip every not-yet-run step that depends, directly or transitively, on `index`
    fn skip_dependents(&mut self, index: usize, rec: &mut ExecutionRecord) {
        let graph = self.graph();
        let mut stack = vec![index];

        while let Some(current) = stack.pop() {
            let cause = &graph.node(current).step.id;
            let status = match self.slots[current] {
                Slot::Finished(status) => status,
                _ => StepStatus::Skipped,
            };
            for &dependent in &graph.node(current).dependents {
                if matches!(self.slots[dependent], Slot::Pending | Slot::Awaiting) {
                    let mut skipped =
                        StepResult::skipped(Some(format!("dependency '{}' {}", cause, status)));
                    skipped.attempts = self.attempts[dependent];
                    self.finish(dependent, skipped, rec);
                    stack.push(dependent);
                }
            }
        }
    }

    /// Record a terminal result
    fn finish(&mut self, index: usize, result: StepResult, rec: &mut ExecutionRecord) {
        let step_id = &self.graph().node(index).step.id;
        self.slots[index] = Slot::Finished(result.status);

        match result.status {
            StepStatus::Failed => warn!(
                step = %step_id,
                error = result.error.as_deref().unwrap_or_default(),
                "Step failed"
            ),
            status => debug!(step = %step_id, %status, time_taken = result.time_taken, "Step finished"),
        }

        rec.trace.push(TraceEntry {
            step_id: step_id.clone(),
            status: result.status,
            started_at: result.started_at,
            finished_at: result.finished_at.unwrap_or_else(Utc::now),
        });
        rec.completed_steps.insert(step_id.clone());
        rec.pending_steps.remove(step_id);

        if let Some(sink) = &self.scheduler.sink {
            sink.on_step_completed(&rec.test_run_id, step_id, &result);
        }
        rec.step_results.insert(step_id.clone(), result);
    }

    fn finalize(&mut self, rec: &mut ExecutionRecord, time_taken: u64) {
        let stranded: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i] == Slot::Awaiting)
            .collect();

        let mut deadlocked = Vec::new();
        for index in stranded {
            // may already have been skipped by an earlier stranded step
            if self.slots[index] != Slot::Awaiting {
                continue;
            }
            let step_id = self.graph().node(index).step.id.clone();
            warn!(step = %step_id, "Deadlock: step reached but its dependencies can never be met");
            let mut skipped = StepResult::skipped(Some(
                "deadlock: reached by pointer but dependencies never completed".to_string(),
            ));
            skipped.attempts = self.attempts[index];
            self.finish(index, skipped, rec);
            self.skip_dependents(index, rec);
            deadlocked.push(step_id);
        }

        let failed: Vec<String> = rec.failed_steps().into_iter().map(String::from).collect();
        rec.failure = if !deadlocked.is_empty() {
            Some(RunFailure::Deadlock(deadlocked))
        } else if !failed.is_empty()
            && self.scheduler.options.failure_policy == FailurePolicy::FailRun
        {
            Some(RunFailure::StepsFailed(failed))
        } else {
            None
        };

        rec.status = if rec.failure.is_none() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        rec.finished_at = Some(Utc::now());
        rec.time_taken = time_taken;

        info!(
            success = rec.success(),
            time_taken,
            completed = rec.completed_steps.len(),
            "Run finished"
        );

        if let Some(sink) = &self.scheduler.sink {
            sink.on_run_completed(rec);
        }
    }
}

/// The pointer a successful step follows, if any
fn pointer_target<'n>(node: &'n StepNode, result: &StepResult) -> Option<&'n str> {
    let target = match &node.step.action {
        StepAction::ToolCode { next, .. } => next.as_deref(),
        StepAction::Condition {
            on_true, on_false, ..
        } => {
            let outcome = result.result.as_ref().map(is_truthy).unwrap_or(false);
            if outcome {
                on_true.as_deref()
            } else {
                on_false.as_deref()
            }
        }
    };
    target.filter(|t| *t != END)
}
