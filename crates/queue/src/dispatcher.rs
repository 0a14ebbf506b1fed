//! Lease-based dispatch: poll, heartbeat, complete and the expiry sweep.
//!
//! Every operation resolves the owning run and applies one
//! [`RunState`] transition through [`RunStore::transition`], so dispatch,
//! renewal, completion and expiry of a step are totally ordered.  The ready
//! queue lock is never held while a run lock is taken.

use std::sync::Arc;

use db::RunStore;
use engine::scheduler::{CompletionOutcome, DispatchOutcome, HeartbeatOutcome, RunState};
use engine::{Clock, EngineError, Lease, OrchestratorConfig, StepAssignment, StepResult};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ready::ReadyQueue;

/// Totals from one pass of [`Dispatcher::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub runs_swept: usize,
    pub expired_leases: usize,
    pub promoted_retries: usize,
    pub requeued: usize,
}

pub struct Dispatcher {
    store: Arc<RunStore<RunState>>,
    ready: ReadyQueue,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<RunStore<RunState>>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            ready: ReadyQueue::new(),
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<RunStore<RunState>> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Steps waiting in the ready queue (stale entries included).
    pub fn queued(&self) -> usize {
        self.ready.len()
    }

    /// Store a freshly materialized run and queue its Ready steps.
    pub async fn admit(&self, state: RunState) -> Result<(), EngineError> {
        let run_id = state.run().id;
        let ready = state.ready_steps();
        let aliases: Vec<Uuid> = state.step_ids().collect();

        self.store.insert(run_id, state, aliases).await?;
        self.enqueue(run_id, ready);
        Ok(())
    }

    pub fn enqueue(&self, run_id: Uuid, steps: impl IntoIterator<Item = Uuid>) {
        self.ready.push_many(run_id, steps);
    }

    /// Lease the oldest Ready step to `worker_id`, or `None` when nothing is
    /// Ready.  Never waits for work.
    #[instrument(skip(self))]
    pub async fn poll(&self, worker_id: &str) -> Result<Option<StepAssignment>, EngineError> {
        while let Some(entry) = self.ready.pop() {
            let now = self.clock.now();
            let outcome = self
                .store
                .transition(entry.run_id, |state: &mut RunState| {
                    state.dispatch(entry.step_id, worker_id, now, &self.config)
                })
                .await;

            match outcome {
                Ok(DispatchOutcome::Leased(assignment)) => {
                    info!(
                        run_id = %entry.run_id,
                        step_id = %entry.step_id,
                        node_id = %assignment.step.node_id,
                        attempt = assignment.step.attempt_count,
                        "step leased"
                    );
                    return Ok(Some(assignment));
                }
                Ok(DispatchOutcome::Rejected { error, ready }) => {
                    warn!(run_id = %entry.run_id, step_id = %entry.step_id, %error, "step rejected at dispatch");
                    self.enqueue(entry.run_id, ready);
                }
                Ok(DispatchOutcome::Stale) => {
                    debug!(step_id = %entry.step_id, "dropping stale ready entry");
                }
                Err(err) => {
                    self.ready.push_front(entry);
                    return Err(err);
                }
            }
        }
        Ok(None)
    }

    /// Renew the lease `worker_id` holds on `step_id`.
    ///
    /// # Errors
    /// - [`EngineError::LeaseExpired`] if the caller no longer holds the lease.
    /// - [`EngineError::Cancellation`] if the run stopped scheduling; the step
    ///   has been Skipped and the worker should drop its work.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, worker_id: &str, step_id: Uuid) -> Result<Lease, EngineError> {
        let run_id = self.run_of(step_id).await?;
        let now = self.clock.now();
        let outcome = self
            .store
            .transition(run_id, |state: &mut RunState| {
                state.heartbeat(step_id, worker_id, now, &self.config)
            })
            .await?;

        match outcome {
            HeartbeatOutcome::Renewed(lease) => Ok(lease),
            HeartbeatOutcome::Abandoned { run_status } => Err(EngineError::Cancellation {
                run_id,
                status: run_status,
            }),
        }
    }

    /// Apply a worker's result for `step_id`.  Repeated calls are no-ops.
    #[instrument(skip(self, result), fields(status = ?result.status))]
    pub async fn complete(
        &self,
        step_id: Uuid,
        result: StepResult,
    ) -> Result<CompletionOutcome, EngineError> {
        let run_id = self.run_of(step_id).await?;
        let lease_id = result.lease_id;
        let now = self.clock.now();
        let outcome = self
            .store
            .transition(run_id, |state: &mut RunState| {
                state.complete(step_id, result, now, &self.config)
            })
            .await?;

        match &outcome {
            CompletionOutcome::Applied { status, ready } => {
                info!(%run_id, %step_id, %status, released = ready.len(), "step completed");
                self.enqueue(run_id, ready.iter().copied());
            }
            CompletionOutcome::Duplicate(status) => {
                debug!(%step_id, %status, "duplicate completion ignored");
            }
            CompletionOutcome::Stale(status) => {
                warn!(%step_id, %status, lease_id = %lease_id, "completion from a stale lease ignored");
            }
        }
        Ok(outcome)
    }

    /// Reclaim expired leases and release due retries across every run.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for run_id in self.store.ids().await {
            if !self.store.read(run_id, |state| state.needs_sweep(now)).await? {
                continue;
            }
            let outcome = self
                .store
                .transition(run_id, |state: &mut RunState| {
                    Ok::<_, EngineError>(state.sweep(now, &self.config))
                })
                .await?;

            report.runs_swept += 1;
            report.expired_leases += outcome.expired;
            report.promoted_retries += outcome.promoted;
            report.requeued += outcome.ready.len();
            self.enqueue(run_id, outcome.ready);
        }

        if report.runs_swept > 0 {
            info!(
                runs = report.runs_swept,
                expired = report.expired_leases,
                promoted = report.promoted_retries,
                requeued = report.requeued,
                "lease sweep finished"
            );
        }
        Ok(report)
    }

    async fn run_of(&self, step_id: Uuid) -> Result<Uuid, EngineError> {
        self.store
            .run_id_for(step_id)
            .await
            .map_err(|_| EngineError::not_found("step", step_id))
    }
}
