use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use db::RunStore;
use engine::scheduler::{CompletionOutcome, RunState};
use engine::{
    Clock, DagDefinition, EngineError, FailurePolicy, ManualClock, NodeSpec, OrchestratorConfig,
    RunStatus, SpecRegistry, StepResult, StepStatus, WorkflowRun,
};
use queue::{Dispatcher, LeaseSweeper};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    registry: SpecRegistry,
    clock: Arc<ManualClock>,
    dispatcher: Arc<Dispatcher>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(RunStore::new()),
            clock.clone(),
            OrchestratorConfig::default(),
        ));
        Self {
            registry: SpecRegistry::new(),
            clock,
            dispatcher,
        }
    }

    async fn submit(&self, name: &str, nodes: Vec<NodeSpec>, budget: Option<i64>) -> Uuid {
        let spec = self
            .registry
            .create(name, DagDefinition::new(nodes), self.clock.now())
            .await
            .expect("register spec");
        let mut run = WorkflowRun::queued(spec.spec_ref(), FailurePolicy::FailFast, self.clock.now());
        run.budget_cents = budget;
        let run_id = run.id;
        let state = RunState::materialize(spec, run).expect("materialize");
        self.dispatcher.admit(state).await.expect("admit");
        run_id
    }

    async fn run_status(&self, run_id: Uuid) -> RunStatus {
        self.dispatcher
            .store()
            .read(run_id, |s| s.run().status)
            .await
            .expect("run exists")
    }
}

fn roots(n: usize) -> Vec<NodeSpec> {
    (0..n).map(|i| NodeSpec::new(format!("n{i}"))).collect()
}

#[tokio::test]
async fn poll_returns_none_when_idle() {
    let h = Harness::new();
    assert_eq!(h.dispatcher.poll("w1").await, Ok(None));
}

#[tokio::test]
async fn poll_is_fifo_across_runs() {
    let h = Harness::new();
    let first = h.submit("first", roots(2), None).await;
    let second = h.submit("second", roots(1), None).await;

    let mut order = Vec::new();
    while let Some(assignment) = h.dispatcher.poll("w1").await.expect("poll") {
        order.push((assignment.step.run_id, assignment.step.node_id));
    }
    assert_eq!(
        order,
        vec![
            (first, "n0".to_string()),
            (first, "n1".to_string()),
            (second, "n0".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_polls_never_share_a_step() {
    let h = Harness::new();
    for i in 0..3 {
        h.submit(&format!("wf{i}"), roots(20), None).await;
    }

    let mut handles = Vec::new();
    for w in 0..16 {
        let dispatcher = Arc::clone(&h.dispatcher);
        handles.push(tokio::spawn(async move {
            let worker = format!("w{w}");
            let mut got = Vec::new();
            while let Some(assignment) = dispatcher.poll(&worker).await.expect("poll") {
                got.push(assignment.step_id());
            }
            got
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for step in handle.await.expect("join") {
            assert!(seen.insert(step), "step {step} was handed out twice");
        }
    }
    assert_eq!(seen.len(), 60);
}

#[tokio::test]
async fn budget_rejection_moves_on_to_the_next_run() {
    let h = Harness::new();
    let poor = h
        .submit("poor", vec![NodeSpec::new("big").estimated_cost(600)], Some(500))
        .await;
    let rich = h.submit("rich", roots(1), None).await;

    let assignment = h.dispatcher.poll("w1").await.expect("poll").expect("work");
    assert_eq!(assignment.step.run_id, rich);
    assert_eq!(h.run_status(poor).await, RunStatus::Failed);
}

#[tokio::test]
async fn expired_lease_is_requeued_for_another_worker() {
    let h = Harness::new();
    h.submit("wf", vec![NodeSpec::new("a").retry_limit(1).timeout_secs(5)], None)
        .await;

    let first = h.dispatcher.poll("slow").await.expect("poll").expect("work");
    h.clock.advance(Duration::from_secs(6));

    let report = h.dispatcher.sweep().await.expect("sweep");
    assert_eq!(report.expired_leases, 1);
    assert_eq!(report.requeued, 1);

    let second = h.dispatcher.poll("fast").await.expect("poll").expect("work");
    assert_eq!(second.step_id(), first.step_id());
    assert_eq!(second.step.attempt_count, 1);

    let err = h
        .dispatcher
        .heartbeat("slow", first.step_id())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LeaseExpired { .. }));

    h.dispatcher
        .heartbeat("fast", second.step_id())
        .await
        .expect("holder renews");
}

#[tokio::test]
async fn sweep_leaves_live_leases_alone() {
    let h = Harness::new();
    h.submit("wf", vec![NodeSpec::new("a").timeout_secs(5)], None).await;
    h.dispatcher.poll("w1").await.expect("poll").expect("work");

    h.clock.advance(Duration::from_secs(4));
    assert_eq!(h.dispatcher.sweep().await.expect("sweep").runs_swept, 0);
}

#[tokio::test]
async fn completion_releases_dependents_into_the_queue() {
    let h = Harness::new();
    let run_id = h
        .submit(
            "wf",
            vec![NodeSpec::new("a"), NodeSpec::new("b").depends_on(["a"])],
            None,
        )
        .await;

    let a = h.dispatcher.poll("w1").await.expect("poll").expect("work");
    assert_eq!(h.dispatcher.poll("w2").await, Ok(None));

    let outcome = h
        .dispatcher
        .complete(a.step_id(), StepResult::succeeded(a.lease_id(), json!({ "n": 1 }), 0))
        .await
        .expect("complete");
    assert!(matches!(outcome, CompletionOutcome::Applied { status: StepStatus::Succeeded, .. }));

    let b = h.dispatcher.poll("w2").await.expect("poll").expect("work");
    assert_eq!(b.step.node_id, "b");
    assert_eq!(b.step.input["dependencies"]["a"]["n"], 1);

    h.dispatcher
        .complete(b.step_id(), StepResult::succeeded(b.lease_id(), json!({}), 0))
        .await
        .expect("complete");
    assert_eq!(h.run_status(run_id).await, RunStatus::Succeeded);
}

#[tokio::test]
async fn unknown_step_is_not_found() {
    let h = Harness::new();
    let ghost = Uuid::new_v4();
    assert!(matches!(
        h.dispatcher.heartbeat("w1", ghost).await,
        Err(EngineError::NotFound { kind: "step", .. })
    ));
    assert!(matches!(
        h.dispatcher.complete(ghost, StepResult::failed(Uuid::new_v4(), "x", 0)).await,
        Err(EngineError::NotFound { kind: "step", .. })
    ));
}

#[tokio::test]
async fn completion_under_a_reassigned_lease_is_ignored() {
    let h = Harness::new();
    let run_id = h
        .submit("wf", vec![NodeSpec::new("a").retry_limit(1).timeout_secs(5)], None)
        .await;
    let first = h.dispatcher.poll("w1").await.expect("poll").expect("work");

    h.clock.advance(Duration::from_secs(6));
    assert_eq!(h.dispatcher.sweep().await.expect("sweep").expired_leases, 1);
    let second = h.dispatcher.poll("w2").await.expect("poll").expect("work");
    assert_eq!(second.step_id(), first.step_id());

    let late = h
        .dispatcher
        .complete(
            first.step_id(),
            StepResult::failed(first.lease_id(), "too slow", 0).fatal(),
        )
        .await
        .expect("complete");
    assert_eq!(late, CompletionOutcome::Stale(StepStatus::Dispatched));
    assert_eq!(h.run_status(run_id).await, RunStatus::Running);

    h.dispatcher
        .complete(
            second.step_id(),
            StepResult::succeeded(second.lease_id(), json!({}), 0),
        )
        .await
        .expect("complete");
    assert_eq!(h.run_status(run_id).await, RunStatus::Succeeded);
}

#[tokio::test]
async fn heartbeat_on_canceled_run_reports_cancellation() {
    let h = Harness::new();
    let run_id = h.submit("wf", roots(1), None).await;
    let a = h.dispatcher.poll("w1").await.expect("poll").expect("work");

    let now = h.clock.now();
    h.dispatcher
        .store()
        .transition(run_id, |s: &mut RunState| Ok::<_, EngineError>(s.cancel(now)))
        .await
        .expect("cancel");

    let err = h.dispatcher.heartbeat("w1", a.step_id()).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Cancellation { run_id, status: RunStatus::Canceled }
    );
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_requeues_and_stops_on_shutdown() {
    let h = Harness::new();
    h.submit("wf", vec![NodeSpec::new("a").retry_limit(1).timeout_secs(5)], None)
        .await;
    h.dispatcher.poll("w1").await.expect("poll").expect("work");
    h.clock.advance(Duration::from_secs(10));

    let shutdown = CancellationToken::new();
    let handle = LeaseSweeper::new(Arc::clone(&h.dispatcher))
        .with_interval(Duration::from_millis(50))
        .spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(h.dispatcher.queued(), 1);

    shutdown.cancel();
    handle.await.expect("sweeper exits cleanly");
}
