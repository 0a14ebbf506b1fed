//! Reference worker.
//!
//! Polls the control plane, runs each leased step through an
//! [`ExecutorSet`], heartbeats while the executor works and reports the
//! outcome.  Poll cadence is the worker's business: it sleeps for
//! `poll_interval` whenever nothing is Ready.

use std::sync::Arc;
use std::time::Duration;

use api::ControlPlane;
use engine::scheduler::CompletionOutcome;
use engine::{EngineError, StepAssignment, StepResult};
use nodes::{ExecutionContext, ExecutorSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerConfig;

pub struct Worker {
    id: String,
    plane: Arc<ControlPlane>,
    executors: ExecutorSet,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        plane: Arc<ControlPlane>,
        executors: ExecutorSet,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            plane,
            executors,
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Work until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "worker started");

        while !shutdown.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(worked) => !worked,
                Err(err) => {
                    error!(worker_id = %self.id, error = %err, "worker iteration failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
    }

    /// Poll once and execute what was handed out.  Returns `false` when
    /// nothing was Ready.
    pub async fn run_once(&self) -> Result<bool, EngineError> {
        match self.plane.poll(&self.id).await? {
            Some(assignment) => {
                self.execute(assignment).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[instrument(skip(self, assignment), fields(worker_id = %self.id, node_id = %assignment.step.node_id))]
    async fn execute(&self, assignment: StepAssignment) -> Result<(), EngineError> {
        let step_id = assignment.step_id();
        let lease_id = assignment.lease_id();
        let ctx = ExecutionContext {
            run_id: assignment.step.run_id,
            step_id,
            node_id: assignment.step.node_id.clone(),
            attempt: assignment.step.attempt_count,
        };

        let mut work = self.executors.for_kind(assignment.kind).execute(
            &assignment.config,
            assignment.step.input.clone(),
            &ctx,
        );
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);

        let outcome = loop {
            tokio::select! {
                out = &mut work => break out,
                _ = heartbeat.tick() => match self.plane.heartbeat(&self.id, step_id).await {
                    Ok(lease) => debug!(expires_at = %lease.expires_at, "lease renewed"),
                    Err(err @ (EngineError::LeaseExpired { .. } | EngineError::Cancellation { .. })) => {
                        warn!(error = %err, "dropping step");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                },
            }
        };

        let result = match outcome {
            Ok(out) => StepResult::succeeded(lease_id, out.output, out.cost_cents),
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "executor failed");
                let result = StepResult::failed(lease_id, err.to_string(), 0);
                if err.is_retryable() {
                    result
                } else {
                    result.fatal()
                }
            }
        };
        if let CompletionOutcome::Stale(status) = self.plane.complete(step_id, result).await? {
            warn!(%status, "lease was lost before the result arrived; result discarded");
        }
        Ok(())
    }
}
