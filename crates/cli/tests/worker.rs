use std::sync::Arc;
use std::time::Duration;

use api::{ControlPlane, SubmitRequest};
use cli::{Worker, WorkerConfig};
use engine::{DagDefinition, NodeSpec, OrchestratorConfig, RunStatus, SpecRef, StepStatus};
use nodes::mock::MockExecutor;
use nodes::simulated::SimulatedExecutor;
use nodes::{ExecutorSet, NodeKind};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 5,
        heartbeat_interval_ms: 50,
        workers: 1,
    }
}

fn simulated() -> ExecutorSet {
    ExecutorSet::new(
        Arc::new(SimulatedExecutor::new(NodeKind::Llm)),
        Arc::new(SimulatedExecutor::new(NodeKind::Function)),
        Arc::new(SimulatedExecutor::new(NodeKind::Tool)),
    )
}

async fn submit(plane: &ControlPlane, nodes: Vec<NodeSpec>) -> Uuid {
    plane
        .register_spec("wf", DagDefinition::new(nodes))
        .await
        .expect("register");
    plane
        .submit_workflow(SubmitRequest::new(SpecRef::latest("wf")))
        .await
        .expect("submit")
        .id
}

/// Step the worker until nothing is Ready.
async fn drain(worker: &Worker) {
    while worker.run_once().await.expect("iteration") {}
}

#[tokio::test]
async fn worker_drives_a_chain_to_success() {
    let plane = Arc::new(ControlPlane::new(OrchestratorConfig::default()).expect("plane"));
    let run_id = submit(
        &plane,
        vec![
            NodeSpec::new("search")
                .kind(NodeKind::Tool)
                .config(json!({ "cost_cents": 40, "output": { "hits": 3 } })),
            NodeSpec::new("answer")
                .kind(NodeKind::Llm)
                .depends_on(["search"])
                .config(json!({ "cost_cents": 110 })),
        ],
    )
    .await;

    let worker = Worker::new("w1", Arc::clone(&plane), simulated(), &worker_config());
    drain(&worker).await;

    let view = plane.get_workflow_run(run_id).await.expect("view");
    assert_eq!(view.run.status, RunStatus::Succeeded);
    assert_eq!(view.run.accumulated_cost_cents, 150);
    let answer = view.step("answer").expect("answer");
    assert_eq!(answer.input["dependencies"]["search"]["hits"], 3);
    assert_eq!(answer.output.as_ref().expect("output")["kind"], "llm");
}

#[tokio::test]
async fn transient_failures_are_retried_by_the_next_poll() {
    let plane = Arc::new(ControlPlane::new(OrchestratorConfig::default()).expect("plane"));
    let run_id = submit(
        &plane,
        vec![NodeSpec::new("flaky")
            .retry_limit(2)
            .config(json!({ "fail_attempts": 2 }))],
    )
    .await;

    let worker = Worker::new("w1", Arc::clone(&plane), simulated(), &worker_config());
    drain(&worker).await;

    let view = plane.get_workflow_run(run_id).await.expect("view");
    let flaky = view.step("flaky").expect("flaky");
    assert_eq!(flaky.attempt_count, 2);
    assert_eq!(flaky.status, StepStatus::Succeeded);
    assert_eq!(view.run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn fatal_executor_error_skips_retries() {
    let plane = Arc::new(ControlPlane::new(OrchestratorConfig::default()).expect("plane"));
    let run_id = submit(&plane, vec![NodeSpec::new("broken").retry_limit(5)]).await;

    let executor = Arc::new(MockExecutor::failing_fatal("broken", "invalid api key"));
    let worker = Worker::new(
        "w1",
        Arc::clone(&plane),
        ExecutorSet::uniform(executor.clone()),
        &worker_config(),
    );
    drain(&worker).await;

    assert_eq!(executor.call_count(), 1);
    let view = plane.get_workflow_run(run_id).await.expect("view");
    let broken = view.step("broken").expect("broken");
    assert_eq!(broken.status, StepStatus::Failed);
    assert!(broken.error.as_deref().unwrap_or_default().contains("invalid api key"));
    assert_eq!(view.run.status, RunStatus::Failed);
}

#[tokio::test]
async fn canceled_run_stops_a_long_step() {
    let plane = Arc::new(ControlPlane::new(OrchestratorConfig::default()).expect("plane"));
    let run_id = submit(
        &plane,
        vec![NodeSpec::new("slow").config(json!({ "delay_ms": 5_000 }))],
    )
    .await;

    let shutdown = CancellationToken::new();
    let worker = Worker::new("w1", Arc::clone(&plane), simulated(), &worker_config());
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    // Let the worker pick the step up and send its first heartbeat.
    tokio::time::sleep(Duration::from_millis(30)).await;
    plane.cancel_workflow_run(run_id).await.expect("cancel");

    // The next heartbeat notices the cancellation.
    let mut status = RunStatus::Canceling;
    for _ in 0..100 {
        status = plane.get_workflow_run(run_id).await.expect("view").run.status;
        if status == RunStatus::Canceled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, RunStatus::Canceled);

    let view = plane.get_workflow_run(run_id).await.expect("view");
    assert_eq!(view.step("slow").expect("slow").status, StepStatus::Skipped);

    shutdown.cancel();
    handle.await.expect("worker exits");
}
