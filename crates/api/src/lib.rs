//! `api` crate — the orchestration control plane.
//!
//! [`ControlPlane`] is the single entry point for both sides of the system:
//!
//! - clients register specs, submit runs, inspect and cancel them;
//! - workers poll for leased steps, heartbeat and report results.
//!
//! It owns the spec registry and the dispatcher; transport is left to the
//! embedding binary.

pub mod request;

use std::sync::Arc;

use db::RunStore;
use engine::scheduler::{CompletionOutcome, RunState};
use engine::{
    Clock, DagDefinition, EngineError, Lease, OrchestratorConfig, RunView, SpecRegistry,
    StepAssignment, StepResult, SystemClock, ValidationError, Version, WorkflowRun, WorkflowSpec,
};
use queue::{Dispatcher, LeaseSweeper, SweepReport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

pub use request::{RunFilter, SubmitRequest};

pub struct ControlPlane {
    registry: SpecRegistry,
    dispatcher: Arc<Dispatcher>,
}

impl ControlPlane {
    pub fn new(config: OrchestratorConfig) -> Result<Self, EngineError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: OrchestratorConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(Arc::new(RunStore::new()), clock, config);
        Ok(Self {
            registry: SpecRegistry::new(),
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        self.dispatcher.config()
    }

    // ----- Specs -----

    pub async fn register_spec(
        &self,
        name: &str,
        dag: DagDefinition,
    ) -> Result<Arc<WorkflowSpec>, EngineError> {
        self.config().check_node_timeouts(&dag.nodes)?;
        self.registry
            .create(name, dag, self.dispatcher.clock().now())
            .await
    }

    pub async fn get_spec(&self, name: &str, version: Version) -> Result<Arc<WorkflowSpec>, EngineError> {
        self.registry.get(name, version).await
    }

    /// Latest version of every registered spec, sorted by name.
    pub async fn list_specs(&self) -> Vec<Arc<WorkflowSpec>> {
        self.registry.list_latest().await
    }

    // ----- Runs -----

    /// Start a run of the referenced spec.  Its root steps are immediately
    /// available to workers.
    #[instrument(skip(self, req), fields(spec = %req.spec))]
    pub async fn submit_workflow(&self, req: SubmitRequest) -> Result<WorkflowRun, EngineError> {
        if let Some(budget) = req.budget_cents.filter(|b| *b < 0) {
            return Err(ValidationError::NegativeBudget(budget).into());
        }
        let spec = self.registry.get(&req.spec.name, req.spec.version).await?;

        let policy = req.policy.unwrap_or(self.config().default_failure_policy);
        let mut run = WorkflowRun::queued(spec.spec_ref(), policy, self.dispatcher.clock().now());
        run.budget_cents = req.budget_cents;
        run.tags = req.tags;
        run.input = req.input;

        let state = RunState::materialize(spec, run)?;
        let run = state.run().clone();
        self.dispatcher.admit(state).await?;

        info!(run_id = %run.id, spec = %run.spec_ref, budget_cents = ?run.budget_cents, "run submitted");
        Ok(run)
    }

    pub async fn get_workflow_run(&self, run_id: Uuid) -> Result<RunView, EngineError> {
        self.dispatcher
            .store()
            .read(run_id, RunState::view)
            .await
            .map_err(|_| EngineError::not_found("run", run_id))
    }

    /// Runs in submission order.
    pub async fn list_runs(&self, filter: &RunFilter) -> Vec<WorkflowRun> {
        let store = self.dispatcher.store();
        let mut runs = Vec::new();
        for run_id in store.ids().await {
            if let Ok(run) = store.read(run_id, |state| state.run().clone()).await {
                if filter.matches(&run) {
                    runs.push(run);
                }
            }
        }
        runs
    }

    /// Stop scheduling a run.  Canceling a finished run returns it unchanged.
    #[instrument(skip(self))]
    pub async fn cancel_workflow_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        let now = self.dispatcher.clock().now();
        let (changed, run) = self
            .dispatcher
            .store()
            .transition(run_id, |state: &mut RunState| {
                let changed = state.cancel(now);
                Ok::<_, EngineError>((changed, state.run().clone()))
            })
            .await
            .map_err(|err| match err {
                EngineError::NotFound { .. } => EngineError::not_found("run", run_id),
                other => other,
            })?;

        if changed {
            info!(%run_id, status = %run.status, "run cancel requested");
        }
        Ok(run)
    }

    // ----- Worker protocol -----

    pub async fn poll(&self, worker_id: &str) -> Result<Option<StepAssignment>, EngineError> {
        self.dispatcher.poll(worker_id).await
    }

    pub async fn heartbeat(&self, worker_id: &str, step_id: Uuid) -> Result<Lease, EngineError> {
        self.dispatcher.heartbeat(worker_id, step_id).await
    }

    pub async fn complete(
        &self,
        step_id: Uuid,
        result: StepResult,
    ) -> Result<CompletionOutcome, EngineError> {
        self.dispatcher.complete(step_id, result).await
    }

    // ----- Maintenance -----

    pub async fn sweep_expired_leases(&self) -> Result<SweepReport, EngineError> {
        self.dispatcher.sweep().await
    }

    /// Run the lease sweeper in the background until `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        LeaseSweeper::new(Arc::clone(&self.dispatcher)).spawn(shutdown)
    }
}
