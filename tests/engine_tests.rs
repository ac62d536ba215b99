use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use toolflow::prelude::*;

fn context(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn trace_of<'a>(record: &'a ExecutionRecord, step: &str) -> &'a TraceEntry {
    record
        .trace
        .iter()
        .find(|t| t.step_id == step)
        .unwrap_or_else(|| panic!("no trace entry for {}", step))
}

fn two_step_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("pair")
        .step(StepDefinition::tool("a", "tool.a"))
        .step(StepDefinition::tool("b", "tool.b").depends_on(["a"]))
}

#[tokio::test]
async fn test_dependent_step_starts_after_dependency_finishes() {
    let store = WorkflowStore::new();
    store.register(two_step_workflow()).await.unwrap();
    store
        .register_mock("tool.a", MockResponse::ok(json!({ "ok": true })).with_delay(10))
        .await;
    store
        .register_mock("tool.b", MockResponse::ok(json!({ "ok": true })))
        .await;

    let outcome = store
        .execute("pair", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.step_results["a"].status, StepStatus::Succeeded);
    assert_eq!(outcome.step_results["b"].status, StepStatus::Succeeded);

    let record = store.get_execution(&outcome.test_run_id).await.unwrap();
    let a = trace_of(&record, "a");
    let b = trace_of(&record, "b");
    assert!(a.finished_at <= b.started_at.unwrap());
}

#[tokio::test]
async fn test_failed_dependency_skips_dependent() {
    let store = WorkflowStore::new();
    store.register(two_step_workflow()).await.unwrap();
    store
        .register_mock("tool.a", MockResponse::error("card declined"))
        .await;
    store
        .register_mock("tool.b", MockResponse::ok(json!({ "ok": true })))
        .await;

    let outcome = store
        .execute("pair", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.step_results["a"].status, StepStatus::Failed);
    assert!(outcome.step_results["a"]
        .error
        .as_deref()
        .unwrap()
        .contains("card declined"));
    assert_eq!(outcome.step_results["b"].status, StepStatus::Skipped);
    assert_eq!(
        outcome.failure,
        Some(RunFailure::StepsFailed(vec!["a".to_string()]))
    );
}

#[tokio::test]
async fn test_condition_takes_true_branch() {
    let store = WorkflowStore::new();
    store
        .register(
            WorkflowDefinition::new("branch")
                .step(
                    StepDefinition::condition("check", "${x} === 5")
                        .on_true("t")
                        .on_false("f"),
                )
                .step(StepDefinition::tool("t", "tool.t"))
                .step(StepDefinition::tool("f", "tool.f")),
        )
        .await
        .unwrap();
    store.register_mock("tool.t", MockResponse::ok(json!(1))).await;
    store.register_mock("tool.f", MockResponse::ok(json!(2))).await;

    let outcome = store
        .execute("branch", context(json!({ "x": 5 })), ExecuteOptions::mock())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.step_results["check"].result, Some(json!(true)));
    assert_eq!(outcome.step_results["t"].status, StepStatus::Succeeded);
    let f = outcome.step_results.get("f").map(|r| r.status);
    assert!(matches!(f, None | Some(StepStatus::Pending)));
}

#[tokio::test]
async fn test_independent_steps_overlap() {
    let store = WorkflowStore::new();
    store
        .register(
            WorkflowDefinition::new("parallel")
                .concurrency(2)
                .step(StepDefinition::tool("a", "slow"))
                .step(StepDefinition::tool("b", "slow")),
        )
        .await
        .unwrap();
    store
        .register_mock("slow", MockResponse::ok(json!(null)).with_delay(50))
        .await;

    let outcome = store
        .execute("parallel", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();
    let record = store.get_execution(&outcome.test_run_id).await.unwrap();

    let a = trace_of(&record, "a");
    let b = trace_of(&record, "b");
    assert!(a.started_at.unwrap() < b.finished_at);
    assert!(b.started_at.unwrap() < a.finished_at);
    assert_eq!(record.peak_concurrency, 2);
    assert!(record.time_taken < 100);
}

#[tokio::test]
async fn test_compare_executions_duration_range() {
    let store = WorkflowStore::new();
    store
        .register(WorkflowDefinition::new("timed").step(StepDefinition::tool("a", "work")))
        .await
        .unwrap();

    store
        .register_mock("work", MockResponse::ok(json!(1)).with_delay(10))
        .await;
    let fast = store
        .execute("timed", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    store
        .register_mock("work", MockResponse::ok(json!(1)).with_delay(50))
        .await;
    let slow = store
        .execute("timed", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    let report = store
        .compare_executions(
            &[fast.test_run_id.clone(), slow.test_run_id.clone()],
            "latency",
        )
        .await;

    assert_eq!(report.label, "latency");
    assert_eq!(report.duration.min, fast.time_taken);
    assert_eq!(report.duration.max, slow.time_taken);
    assert!(report.duration.min >= 10);
    assert!(report.duration.max >= 50);
    assert!(report.steps["a"].delta >= 30);
    assert_eq!(report.success_rate, 1.0);
    assert!(report.warnings.is_empty());
}

#[tokio::test]
async fn test_mock_runs_are_deterministic() {
    let store = WorkflowStore::new();
    store
        .register(
            WorkflowDefinition::new("diamond")
                .concurrency(3)
                .step(StepDefinition::tool("root", "ok"))
                .step(StepDefinition::tool("left", "ok").depends_on(["root"]))
                .step(StepDefinition::tool("right", "bad").depends_on(["root"]))
                .step(StepDefinition::tool("join", "ok").depends_on(["left", "right"]))
                .step(StepDefinition::tool("solo", "ok")),
        )
        .await
        .unwrap();
    store.register_mock("ok", MockResponse::ok(json!(1))).await;
    store.register_mock("bad", MockResponse::error("nope")).await;

    let first = store
        .execute("diamond", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();
    let second = store
        .execute("diamond", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    let statuses = |outcome: &ExecutionOutcome| {
        let mut s: Vec<(String, StepStatus)> = outcome
            .step_results
            .iter()
            .map(|(id, r)| (id.clone(), r.status))
            .collect();
        s.sort_by(|a, b| a.0.cmp(&b.0));
        s
    };
    assert_eq!(statuses(&first), statuses(&second));
    assert_eq!(first.success, second.success);

    let order_first = store.get_execution(&first.test_run_id).await.unwrap();
    let order_second = store.get_execution(&second.test_run_id).await.unwrap();
    assert_eq!(order_first.completion_order(), order_second.completion_order());
    assert_eq!(
        order_first.completion_order(),
        vec!["root", "solo", "left", "right", "join"]
    );
}

#[tokio::test]
async fn test_dependencies_finish_before_dependents_start() {
    let store = WorkflowStore::new();
    store
        .register(
            WorkflowDefinition::new("layers")
                .concurrency(4)
                .step(StepDefinition::tool("a", "work"))
                .step(StepDefinition::tool("b", "work"))
                .step(StepDefinition::tool("c", "work").depends_on(["a"]))
                .step(StepDefinition::tool("d", "work").depends_on(["a", "b"]))
                .step(StepDefinition::tool("e", "work").depends_on(["c", "d"])),
        )
        .await
        .unwrap();
    store
        .register_mock("work", MockResponse::ok(json!(1)).with_delay(5))
        .await;

    let outcome = store
        .execute("layers", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();
    assert!(outcome.success);

    let record = store.get_execution(&outcome.test_run_id).await.unwrap();
    let workflow = store.get_workflow("layers").await.unwrap();
    for step in &workflow.steps {
        let started = trace_of(&record, &step.id).started_at.unwrap();
        for dep in &step.dependencies {
            assert!(trace_of(&record, dep).finished_at <= started);
        }
    }
}

#[tokio::test]
async fn test_running_steps_never_exceed_limit() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tools = ToolRegistry::new();
    let (r, p) = (running.clone(), peak.clone());
    tools.register("work", move |_| {
        let (running, peak) = (r.clone(), p.clone());
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(now))
        }
    });

    let mut workflow = WorkflowDefinition::new("wide").concurrency(2);
    for i in 0..6 {
        workflow = workflow.step(StepDefinition::tool(format!("s{}", i), "work"));
    }

    let store = WorkflowStore::new().with_invoker(Arc::new(tools));
    store.register(workflow).await.unwrap();

    let outcome = store
        .execute("wide", Map::new(), ExecuteOptions::real())
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    let record = store.get_execution(&outcome.test_run_id).await.unwrap();
    assert_eq!(record.peak_concurrency, 2);
}

#[tokio::test]
async fn test_captured_result_substituted_into_params() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut tools = ToolRegistry::new();
    tools.register("orders.create", |_| async {
        Ok(json!({ "id": "ord_42", "total": 99.5 }))
    });
    let sink = seen.clone();
    tools.register("payments.charge", move |params| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(params.clone());
            Ok(json!({ "status": "paid" }))
        }
    });

    let store = WorkflowStore::new().with_invoker(Arc::new(tools));
    store
        .register(
            WorkflowDefinition::new("checkout")
                .step(StepDefinition::tool("create", "orders.create").capture("order"))
                .step(
                    StepDefinition::tool("charge", "payments.charge")
                        .depends_on(["create"])
                        .params(json!({
                            "order": "${order}",
                            "amount": "${order.total}",
                            "memo": "order ${order.id} for ${customer}"
                        })),
                ),
        )
        .await
        .unwrap();

    let outcome = store
        .execute(
            "checkout",
            context(json!({ "customer": "ada" })),
            ExecuteOptions::real(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["order"], json!({ "id": "ord_42", "total": 99.5 }));
    assert_eq!(calls[0]["amount"], json!(99.5));
    assert_eq!(calls[0]["memo"], json!("order ord_42 for ada"));

    // The registered definition still holds the placeholders
    let workflow = store.get_workflow("checkout").await.unwrap();
    match &workflow.steps[1].action {
        StepAction::ToolCode { params, .. } => assert_eq!(params["order"], json!("${order}")),
        _ => panic!("expected tool step"),
    }
}

#[tokio::test]
async fn test_cyclic_dependencies_rejected() {
    let store = WorkflowStore::new();
    let result = store
        .register(
            WorkflowDefinition::new("cycle")
                .step(StepDefinition::tool("a", "t").depends_on(["b"]))
                .step(StepDefinition::tool("b", "t").depends_on(["a"])),
        )
        .await;

    match result {
        Err(EngineError::Validation(ValidationError::CyclicDependency(path))) => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"b".to_string()));
        }
        other => panic!("expected cycle rejection, got {:?}", other),
    }
    assert!(matches!(
        store.execute("cycle", Map::new(), ExecuteOptions::mock()).await,
        Err(EngineError::WorkflowNotFound(_))
    ));
}

#[tokio::test]
async fn test_runs_do_not_share_variables() {
    let mut tools = ToolRegistry::new();
    tools.register("echo", |params| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Value::Object(params))
    });

    let store = Arc::new(WorkflowStore::new().with_invoker(Arc::new(tools)));
    store
        .register(
            WorkflowDefinition::new("greet").step(
                StepDefinition::tool("say", "echo").params(json!({ "text": "hi ${name}" })),
            ),
        )
        .await
        .unwrap();

    let (ada, bob) = tokio::join!(
        store.execute("greet", context(json!({ "name": "ada" })), ExecuteOptions::real()),
        store.execute("greet", context(json!({ "name": "bob" })), ExecuteOptions::real()),
    );

    assert_eq!(
        ada.unwrap().step_results["say"].result,
        Some(json!({ "text": "hi ada" }))
    );
    assert_eq!(
        bob.unwrap().step_results["say"].result,
        Some(json!({ "text": "hi bob" }))
    );
}

#[tokio::test]
async fn test_status_visible_while_running() {
    let store = Arc::new(WorkflowStore::new());
    store
        .register(WorkflowDefinition::new("slow").step(StepDefinition::tool("wait", "slow")))
        .await
        .unwrap();
    store
        .register_mock("slow", MockResponse::ok(json!(1)).with_delay(200))
        .await;

    let runner = store.clone();
    let handle = tokio::spawn(async move {
        runner
            .execute("slow", Map::new(), ExecuteOptions::mock())
            .await
    });

    let mut observed = None;
    for _ in 0..100 {
        if let Some(record) = store.list_executions(Some("slow")).await.into_iter().next() {
            if record.status_of("wait") == Some(StepStatus::Running) {
                observed = Some(record);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let observed = observed.expect("run never observed in progress");
    assert_eq!(observed.status, RunStatus::Running);
    assert!(observed.pending_steps.contains("wait"));

    let outcome = handle.await.unwrap().unwrap();
    let finished = store.get_execution(&outcome.test_run_id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert!(finished.finished_at.is_some());
}

#[tokio::test]
async fn test_pointer_chain_with_dependencies() {
    let store = WorkflowStore::new();
    store
        .register(
            WorkflowDefinition::new("mixed")
                .concurrency(2)
                .step(StepDefinition::tool("fetch", "slow").capture("profile"))
                .step(StepDefinition::tool("start", "ok").next("notify"))
                .step(
                    StepDefinition::tool("notify", "ok")
                        .depends_on(["fetch"])
                        .params(json!({ "to": "${profile.email}" })),
                ),
        )
        .await
        .unwrap();
    store
        .register_mock(
            "slow",
            MockResponse::ok(json!({ "email": "ada@example.com" })).with_delay(30),
        )
        .await;
    store.register_mock("ok", MockResponse::ok(json!(true))).await;

    let outcome = store
        .execute("mixed", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    assert!(outcome.success);
    let record = store.get_execution(&outcome.test_run_id).await.unwrap();
    // notify is reached early through the pointer but waits for fetch
    assert_eq!(record.completion_order(), vec!["start", "fetch", "notify"]);
}

#[tokio::test]
async fn test_channel_sink_receives_events() {
    let (sink, mut events) = ChannelSink::new(16);
    let store = WorkflowStore::new().with_sink(Arc::new(sink));
    store.register(two_step_workflow()).await.unwrap();
    store.register_mock("tool.a", MockResponse::ok(json!(1))).await;
    store.register_mock("tool.b", MockResponse::ok(json!(2))).await;

    let outcome = store
        .execute("pair", Map::new(), ExecuteOptions::mock())
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert_eq!(received.len(), 3);
    assert_eq!(received[0].step_id.as_deref(), Some("a"));
    assert_eq!(received[1].step_id.as_deref(), Some("b"));
    assert_eq!(received[2].run_id, outcome.test_run_id);
    assert_eq!(received[2].success, Some(true));
}
