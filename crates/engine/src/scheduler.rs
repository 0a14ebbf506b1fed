//! DAG scheduler and run/step state machine.
//!
//! A [`RunState`] is one run's complete mutable record: the run, its steps
//! (in declaration order), the in-degree bookkeeping and the budget
//! reservations of in-flight steps.  Every public method is a single
//! transition; callers apply it under the run store's per-run lock so a run
//! only ever observes one transition at a time.
//!
//! Transitions that make steps Ready return their ids so the caller can
//! enqueue them for dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::budget;
use crate::config::OrchestratorConfig;
use crate::dag::Topology;
use crate::error::EngineError;
use crate::models::{
    FailurePolicy, Lease, ResultStatus, RunStatus, RunView, StepAssignment, StepResult, StepRun,
    StepStatus, WorkflowRun, WorkflowSpec,
};

const LEASE_EXPIRED: &str = "lease expired";

// ---------------------------------------------------------------------------
// Transition outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The step is now Dispatched under a fresh lease.
    Leased(StepAssignment),
    /// The budget check failed; the step is Failed and never reached a worker.
    /// `ready` lists steps unblocked by the failure under the tolerant policy.
    Rejected { error: EngineError, ready: Vec<Uuid> },
    /// The step is no longer Ready (or the run stopped scheduling).
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatOutcome {
    Renewed(Lease),
    /// The run stopped scheduling; the step was Skipped and its lease released.
    Abandoned { run_status: RunStatus },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The result was applied; `status` is the step's status afterwards.
    Applied { status: StepStatus, ready: Vec<Uuid> },
    /// The step already reached a terminal status; nothing changed.
    Duplicate(StepStatus),
    /// The result does not quote the step's current, unexpired lease.  The
    /// lease ran out, or the step was re-queued or leased to another worker
    /// since; the result is ignored.
    Stale(StepStatus),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepOutcome {
    /// Leases that had expired.
    pub expired: usize,
    /// Retrying steps whose back-off elapsed.
    pub promoted: usize,
    pub ready: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunState {
    run: WorkflowRun,
    steps: Vec<StepRun>,
    spec: Arc<WorkflowSpec>,
    topology: Arc<Topology>,
    step_index: Arc<HashMap<Uuid, usize>>,
    /// Dependencies of each step not yet satisfied.
    remaining: Vec<usize>,
    /// Estimated cost of steps currently holding a lease.
    reserved_cents: i64,
}

impl RunState {
    /// Create one Pending step per node and make the roots Ready.
    pub fn materialize(spec: Arc<WorkflowSpec>, run: WorkflowRun) -> Result<Self, EngineError> {
        let topology = Topology::build(&spec.nodes)?;

        let mut steps: Vec<StepRun> = spec
            .nodes
            .iter()
            .map(|node| StepRun::pending(run.id, node.id.clone()))
            .collect();
        let remaining: Vec<usize> = topology.dependencies.iter().map(Vec::len).collect();

        for (step, &deps) in steps.iter_mut().zip(&remaining) {
            if deps == 0 {
                step.status = StepStatus::Ready;
            }
        }

        let step_index = steps.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

        Ok(Self {
            run,
            steps,
            spec,
            topology: Arc::new(topology),
            step_index: Arc::new(step_index),
            remaining,
            reserved_cents: 0,
        })
    }

    pub fn run(&self) -> &WorkflowRun {
        &self.run
    }

    pub fn steps(&self) -> &[StepRun] {
        &self.steps
    }

    pub fn spec(&self) -> &Arc<WorkflowSpec> {
        &self.spec
    }

    pub fn reserved_cents(&self) -> i64 {
        self.reserved_cents
    }

    pub fn step_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.steps.iter().map(|s| s.id)
    }

    /// Ready steps in declaration order.
    pub fn ready_steps(&self) -> Vec<Uuid> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Ready)
            .map(|s| s.id)
            .collect()
    }

    pub fn view(&self) -> RunView {
        RunView {
            run: self.run.clone(),
            steps: self.steps.clone(),
        }
    }

    /// Whether the run still makes steps Ready and dispatches them.
    pub fn is_active(&self) -> bool {
        matches!(self.run.status, RunStatus::Queued | RunStatus::Running)
    }

    /// Whether [`RunState::sweep`] would change anything at `now`.
    pub fn needs_sweep(&self, now: DateTime<Utc>) -> bool {
        self.steps.iter().any(|s| {
            let lease_expired = s.status.is_in_flight()
                && s.lease.as_ref().is_some_and(|l| l.expires_at <= now);
            let retry_due =
                s.status == StepStatus::Retrying && s.retry_at.is_some_and(|at| at <= now);
            lease_expired || retry_due
        })
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Hand a Ready step to `worker_id` under a new lease.
    pub fn dispatch(
        &mut self,
        step_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        cfg: &OrchestratorConfig,
    ) -> Result<DispatchOutcome, EngineError> {
        let idx = self.index_of(step_id)?;
        if !self.is_active() || self.steps[idx].status != StepStatus::Ready {
            return Ok(DispatchOutcome::Stale);
        }

        let spec = Arc::clone(&self.spec);
        let node = &spec.nodes[idx];

        if let Err(error) = budget::check_dispatch(&self.run, self.reserved_cents, node) {
            warn!(run_id = %self.run.id, node_id = %node.id, %error, "dispatch rejected by budget");
            let step = &mut self.steps[idx];
            step.status = StepStatus::Failed;
            step.error = Some(error.to_string());
            step.ended_at = Some(now);

            let mut ready = Vec::new();
            self.on_step_failed_terminal(idx, now, &mut ready);
            self.refresh_status(now);
            return Ok(DispatchOutcome::Rejected { error, ready });
        }

        let input = self.resolve_input(idx);
        let ttl = node
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| cfg.default_lease_ttl());
        let lease = Lease {
            id: Uuid::new_v4(),
            worker_id: worker_id.to_owned(),
            expires_at: after(now, ttl),
            abandoned: false,
        };

        let step = &mut self.steps[idx];
        step.status = StepStatus::Dispatched;
        step.lease = Some(lease.clone());
        step.input = input;
        step.retry_at = None;
        step.started_at.get_or_insert(now);
        let assigned = step.clone();
        self.reserved_cents = self.reserved_cents.saturating_add(node.estimated_cost_cents);

        if self.run.status == RunStatus::Queued {
            self.run.status = RunStatus::Running;
            self.run.started_at = Some(now);
            info!(run_id = %self.run.id, spec = %self.run.spec_ref, "run started");
        }

        debug!(
            run_id = %self.run.id,
            node_id = %node.id,
            worker_id,
            attempt = assigned.attempt_count,
            "step dispatched"
        );
        Ok(DispatchOutcome::Leased(StepAssignment {
            step: assigned,
            lease,
            kind: node.kind,
            config: node.config.clone(),
        }))
    }

    /// Input handed to a worker: the run input plus the output of every
    /// dependency, keyed by node id.
    fn resolve_input(&self, idx: usize) -> Value {
        let dependencies: Map<String, Value> = self.topology.dependencies[idx]
            .iter()
            .map(|&d| {
                let dep = &self.steps[d];
                (dep.node_id.clone(), dep.output.clone().unwrap_or(Value::Null))
            })
            .collect();

        let mut input = Map::new();
        input.insert("run".into(), self.run.input.clone());
        input.insert("dependencies".into(), Value::Object(dependencies));
        Value::Object(input)
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Renew the lease `worker_id` holds on the step.
    ///
    /// # Errors
    /// [`EngineError::LeaseExpired`] unless `worker_id` holds the step's
    /// current, unexpired lease.
    pub fn heartbeat(
        &mut self,
        step_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        cfg: &OrchestratorConfig,
    ) -> Result<HeartbeatOutcome, EngineError> {
        let idx = self.index_of(step_id)?;
        let step = &self.steps[idx];

        let held = step.status.is_in_flight()
            && step
                .lease
                .as_ref()
                .is_some_and(|l| l.worker_id == worker_id && now < l.expires_at);
        if !held {
            return Err(EngineError::LeaseExpired {
                step_id,
                worker_id: worker_id.to_owned(),
            });
        }

        if step.lease.as_ref().is_some_and(|l| l.abandoned) {
            self.release_lease(idx);
            let step = &mut self.steps[idx];
            step.status = StepStatus::Skipped;
            step.ended_at = Some(now);
            self.refresh_status(now);
            info!(run_id = %self.run.id, %step_id, "abandoned step released on heartbeat");
            return Ok(HeartbeatOutcome::Abandoned {
                run_status: self.run.status,
            });
        }

        let ttl = self.spec.nodes[idx]
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| cfg.default_lease_ttl());

        let step = &mut self.steps[idx];
        if step.status == StepStatus::Dispatched {
            step.status = StepStatus::Running;
        }
        let Some(lease) = step.lease.as_mut() else {
            return Err(EngineError::Internal(format!("step {step_id} lost its lease")));
        };
        lease.expires_at = after(now, ttl);
        Ok(HeartbeatOutcome::Renewed(lease.clone()))
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Apply a worker's result.  Idempotent by step id.
    ///
    /// Only a result quoting the step's current lease, delivered before that
    /// lease expires, is applied; anything else is [`CompletionOutcome::Stale`].
    pub fn complete(
        &mut self,
        step_id: Uuid,
        result: StepResult,
        now: DateTime<Utc>,
        cfg: &OrchestratorConfig,
    ) -> Result<CompletionOutcome, EngineError> {
        let idx = self.index_of(step_id)?;
        let status = self.steps[idx].status;
        if status.is_terminal() {
            return Ok(CompletionOutcome::Duplicate(status));
        }
        if !status.is_in_flight() {
            return Ok(CompletionOutcome::Stale(status));
        }
        let held = self.steps[idx]
            .lease
            .as_ref()
            .is_some_and(|l| l.id == result.lease_id && now < l.expires_at);
        if !held {
            debug!(
                run_id = %self.run.id,
                %step_id,
                lease_id = %result.lease_id,
                "result from a lease that is no longer current"
            );
            return Ok(CompletionOutcome::Stale(status));
        }

        let abandoned = self.release_lease(idx).is_some_and(|l| l.abandoned) || !self.is_active();

        let actual = result.actual_cost_cents.max(0);
        self.steps[idx].cost_cents = self.steps[idx].cost_cents.saturating_add(actual);
        if !self.run.status.is_terminal() {
            let charge = budget::charge(&mut self.run, actual);
            if charge.overrun_cents > 0 {
                warn!(
                    run_id = %self.run.id,
                    node_id = %self.steps[idx].node_id,
                    overrun_cents = charge.overrun_cents,
                    "actual cost exceeded the remaining budget; charge clamped"
                );
            }
        }

        let mut ready = Vec::new();
        match result.status {
            ResultStatus::Succeeded => {
                let step = &mut self.steps[idx];
                step.status = StepStatus::Succeeded;
                step.output = Some(result.output.unwrap_or(Value::Null));
                step.error = None;
                step.ended_at = Some(now);
                if !abandoned {
                    self.satisfy_dependents(idx, &mut ready);
                }
            }
            ResultStatus::Failed => {
                let node = &self.spec.nodes[idx];
                let error = EngineError::WorkerReported {
                    node_id: node.id.clone(),
                    message: result.error.unwrap_or_else(|| "step failed".into()),
                };
                let retry = !abandoned
                    && result.retryable
                    && self.steps[idx].attempt_count < node.retry_limit;

                let step = &mut self.steps[idx];
                step.error = Some(error.to_string());
                if retry {
                    self.schedule_retry(idx, now, cfg, &mut ready);
                } else {
                    step.status = StepStatus::Failed;
                    step.ended_at = Some(now);
                    warn!(run_id = %self.run.id, %step_id, %error, "step failed");
                    if !abandoned {
                        self.on_step_failed_terminal(idx, now, &mut ready);
                    }
                }
            }
        }

        self.refresh_status(now);
        Ok(CompletionOutcome::Applied {
            status: self.steps[idx].status,
            ready,
        })
    }

    // -----------------------------------------------------------------------
    // Lease expiry / retry back-off
    // -----------------------------------------------------------------------

    /// Reclaim expired leases and promote Retrying steps whose back-off
    /// elapsed.
    pub fn sweep(&mut self, now: DateTime<Utc>, cfg: &OrchestratorConfig) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for idx in 0..self.steps.len() {
            let step = &self.steps[idx];
            let expired = step.status.is_in_flight()
                && step.lease.as_ref().is_some_and(|l| l.expires_at <= now);
            let retry_due = step.status == StepStatus::Retrying
                && step.retry_at.is_some_and(|at| at <= now);

            if expired {
                outcome.expired += 1;
                self.expire_lease(idx, now, cfg, &mut outcome.ready);
            } else if retry_due {
                outcome.promoted += 1;
                let step = &mut self.steps[idx];
                step.status = StepStatus::Ready;
                step.retry_at = None;
                outcome.ready.push(step.id);
            }
        }

        if outcome.expired > 0 {
            self.refresh_status(now);
        }
        outcome
    }

    fn expire_lease(
        &mut self,
        idx: usize,
        now: DateTime<Utc>,
        cfg: &OrchestratorConfig,
        ready: &mut Vec<Uuid>,
    ) {
        let worker = self.release_lease(idx).map(|l| l.worker_id).unwrap_or_default();
        let retry_limit = self.spec.nodes[idx].retry_limit;
        let active = self.is_active();

        let step = &mut self.steps[idx];
        step.error = Some(LEASE_EXPIRED.into());
        info!(
            run_id = %step.run_id,
            node_id = %step.node_id,
            worker_id = %worker,
            attempt = step.attempt_count,
            "lease expired"
        );

        if !active {
            step.status = StepStatus::Skipped;
            step.ended_at = Some(now);
        } else if step.attempt_count < retry_limit {
            self.schedule_retry(idx, now, cfg, ready);
        } else {
            step.status = StepStatus::Failed;
            step.ended_at = Some(now);
            self.on_step_failed_terminal(idx, now, ready);
        }
    }

    /// Bump the attempt counter and wait out the back-off (or go straight
    /// back to Ready when there is none).
    fn schedule_retry(
        &mut self,
        idx: usize,
        now: DateTime<Utc>,
        cfg: &OrchestratorConfig,
        ready: &mut Vec<Uuid>,
    ) {
        let step = &mut self.steps[idx];
        step.attempt_count += 1;
        let delay = cfg.retry_delay(step.attempt_count - 1);

        if delay.is_zero() {
            step.status = StepStatus::Ready;
            step.retry_at = None;
            ready.push(step.id);
        } else {
            step.status = StepStatus::Retrying;
            step.retry_at = Some(after(now, delay));
        }
        info!(
            run_id = %step.run_id,
            node_id = %step.node_id,
            attempt = step.attempt_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "step scheduled for retry"
        );
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Stop scheduling the run.  Returns `false` when the run was already
    /// terminal or canceling.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.run.status.is_terminal() || self.run.status == RunStatus::Canceling {
            return false;
        }
        self.run.status = RunStatus::Canceling;
        self.stop_scheduling(now);
        info!(run_id = %self.run.id, "run canceling");
        self.refresh_status(now);
        true
    }

    /// Skip every step that hasn't started and flag outstanding leases as
    /// abandoned.
    fn stop_scheduling(&mut self, now: DateTime<Utc>) {
        for step in &mut self.steps {
            match step.status {
                StepStatus::Pending | StepStatus::Ready | StepStatus::Retrying => {
                    step.status = StepStatus::Skipped;
                    step.retry_at = None;
                    step.ended_at = Some(now);
                }
                StepStatus::Dispatched | StepStatus::Running => {
                    if let Some(lease) = step.lease.as_mut() {
                        lease.abandoned = true;
                    }
                }
                StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    /// Count step `idx` as satisfied for each of its dependents.
    fn satisfy_dependents(&mut self, idx: usize, ready: &mut Vec<Uuid>) {
        let topology = Arc::clone(&self.topology);
        for &d in &topology.dependents[idx] {
            self.remaining[d] = self.remaining[d].saturating_sub(1);
            if self.is_active() && self.remaining[d] == 0 && self.steps[d].status == StepStatus::Pending
            {
                self.steps[d].status = StepStatus::Ready;
                ready.push(self.steps[d].id);
            }
        }
    }

    /// Step `idx` failed for good.
    ///
    /// Under the tolerant policy the failed step's Pending dependents are
    /// Skipped, and a Skipped step counts as satisfied for its own
    /// dependents.  A grandchild whose dependencies are all Succeeded or
    /// Skipped therefore still runs, seeing `null` for each skipped input.
    fn on_step_failed_terminal(&mut self, idx: usize, now: DateTime<Utc>, ready: &mut Vec<Uuid>) {
        match self.run.policy {
            FailurePolicy::FailFast => {
                let reason = format!(
                    "step '{}' failed: {}",
                    self.steps[idx].node_id,
                    self.steps[idx].error.as_deref().unwrap_or("unknown error")
                );
                self.stop_scheduling(now);
                self.run.status = RunStatus::Failed;
                self.run.error = Some(reason);
                self.run.ended_at = Some(now);
                warn!(run_id = %self.run.id, "run failed");
            }
            FailurePolicy::Tolerant => {
                let topology = Arc::clone(&self.topology);
                let failed = self.steps[idx].node_id.clone();
                for &d in &topology.dependents[idx] {
                    if self.steps[d].status != StepStatus::Pending {
                        continue;
                    }
                    let step = &mut self.steps[d];
                    step.status = StepStatus::Skipped;
                    step.error = Some(format!("dependency '{failed}' failed"));
                    step.ended_at = Some(now);
                    // A skipped dependency counts as satisfied.
                    self.satisfy_dependents(d, ready);
                }
            }
        }
    }

    /// Recompute the run status from step statuses.
    fn refresh_status(&mut self, now: DateTime<Utc>) {
        if self.run.status.is_terminal() {
            return;
        }

        let next = if self.run.status == RunStatus::Canceling {
            if self.steps.iter().any(|s| s.status.is_in_flight()) {
                return;
            }
            RunStatus::Canceled
        } else {
            if !self.steps.iter().all(|s| s.status.is_terminal()) {
                return;
            }
            let succeeded = self
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Succeeded)
                .count();
            if succeeded == self.steps.len() {
                RunStatus::Succeeded
            } else if self.run.policy == FailurePolicy::Tolerant && succeeded > 0 {
                RunStatus::PartialSuccess
            } else {
                RunStatus::Failed
            }
        };

        if next == RunStatus::Failed && self.run.error.is_none() {
            self.run.error = Some("no step succeeded".into());
        }
        self.run.status = next;
        self.run.ended_at = Some(now);
        info!(
            run_id = %self.run.id,
            status = %next,
            cost_cents = self.run.accumulated_cost_cents,
            "run finished"
        );
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn index_of(&self, step_id: Uuid) -> Result<usize, EngineError> {
        self.step_index
            .get(&step_id)
            .copied()
            .ok_or_else(|| EngineError::not_found("step", step_id))
    }

    /// Drop the step's lease and its budget reservation.
    fn release_lease(&mut self, idx: usize) -> Option<Lease> {
        let lease = self.steps[idx].lease.take()?;
        self.reserved_cents = self
            .reserved_cents
            .saturating_sub(self.spec.nodes[idx].estimated_cost_cents)
            .max(0);
        Some(lease)
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
