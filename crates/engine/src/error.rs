//! Engine-level error types.

use db::DbError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::RunStatus;

/// A spec, request or configuration was rejected before anything ran.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must contain at least one node")]
    EmptyWorkflow,

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A `depends_on` entry names a node that doesn't exist in the spec.
    #[error("node '{node_id}' depends on unknown node '{missing}'")]
    UnknownDependency { node_id: String, missing: String },

    #[error("node '{0}' depends on itself")]
    SelfDependency(String),

    /// Topological sort left these nodes with unresolved in-degree.
    #[error("workflow graph contains a cycle through: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    #[error("node '{node_id}' has a negative estimated cost ({cost_cents} cents)")]
    NegativeCost { node_id: String, cost_cents: i64 },

    /// A lease with a zero TTL expires the instant it is granted.
    #[error("node '{0}' has a zero timeout")]
    ZeroTimeout(String),

    /// The sweeper would not notice the lease expiring in time.
    #[error(
        "node '{node_id}' times out after {timeout_secs}s, which is not longer \
         than the {sweep_interval_ms}ms sweep interval"
    )]
    TimeoutBelowSweepInterval {
        node_id: String,
        timeout_secs: u64,
        sweep_interval_ms: u64,
    },

    #[error("budget must not be negative ({0} cents)")]
    NegativeBudget(i64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors produced by the orchestration runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Dispatch-time budget check failed; the step never reached a worker.
    #[error(
        "budget exceeded for node '{node_id}': {committed_cents} committed + \
         {estimated_cents} estimated > {budget_cents} budget"
    )]
    BudgetExceeded {
        node_id: String,
        committed_cents: i64,
        estimated_cents: i64,
        budget_cents: i64,
    },

    /// The caller no longer holds the step's lease and must discard its work.
    #[error("lease on step {step_id} is not held by worker '{worker_id}'")]
    LeaseExpired { step_id: Uuid, worker_id: String },

    /// The worker's own execution failed.
    #[error("worker reported failure for node '{node_id}': {message}")]
    WorkerReported { node_id: String, message: String },

    /// The step belongs to a run that stopped scheduling.
    #[error("run {run_id} is {status}; step work is abandoned")]
    Cancellation { run_id: Uuid, status: RunStatus },

    #[error("store error: {0}")]
    Store(DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(id) => Self::not_found("record", id),
            other => Self::Store(other),
        }
    }
}
