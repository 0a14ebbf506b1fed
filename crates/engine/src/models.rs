//! Core domain models for the orchestration runtime.
//!
//! Specs are immutable once registered.  Runs and step runs are the mutable
//! records the scheduler owns; they serialise to the JSON shape returned by
//! the control plane.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use nodes::NodeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NodeSpec / DagDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier within the spec (referenced by `depends_on`).
    pub id: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
    /// How many times a failed attempt may be retried.
    #[serde(default)]
    pub retry_limit: u32,
    /// Lease TTL for one attempt; the configured default applies when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub estimated_cost_cents: i64,
    /// Executor configuration, passed through to the worker untouched.
    #[serde(default)]
    pub config: Value,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::default(),
            depends_on: Vec::new(),
            retry_limit: 0,
            timeout_secs: None,
            estimated_cost_cents: 0,
            config: Value::Null,
        }
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn estimated_cost(mut self, cents: i64) -> Self {
        self.estimated_cost_cents = cents;
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// The DAG submitted to the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagDefinition {
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeSpec>,
}

impl DagDefinition {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self {
            description: String::new(),
            nodes,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowSpec
// ---------------------------------------------------------------------------

/// An immutable, versioned workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub description: String,
    pub nodes: Vec<NodeSpec>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowSpec {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn spec_ref(&self) -> SpecRef {
        SpecRef::exact(self.name.clone(), self.version)
    }
}

/// Which version of a named spec to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    #[default]
    Latest,
    Exact(u32),
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Exact(v) => write!(f, "v{v}"),
        }
    }
}

/// Reference to a spec by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecRef {
    pub name: String,
    #[serde(default)]
    pub version: Version,
}

impl SpecRef {
    pub fn latest(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Version::Latest,
        }
    }

    pub fn exact(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version: Version::Exact(version),
        }
    }
}

impl fmt::Display for SpecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    /// Transient: cancellation requested, in-flight steps still draining.
    Canceling,
    Succeeded,
    Failed,
    PartialSuccess,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::PartialSuccess | Self::Canceled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Canceling => write!(f, "canceling"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued"          => Ok(Self::Queued),
            "running"         => Ok(Self::Running),
            "canceling"       => Ok(Self::Canceling),
            "succeeded"       => Ok(Self::Succeeded),
            "failed"          => Ok(Self::Failed),
            "partial_success" => Ok(Self::PartialSuccess),
            "canceled"        => Ok(Self::Canceled),
            other             => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Lifecycle of a single step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    /// Waiting out a retry backoff before becoming Ready again.
    Retrying,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Held by a worker under a lease.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending    => write!(f, "pending"),
            Self::Ready      => write!(f, "ready"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Running    => write!(f, "running"),
            Self::Succeeded  => write!(f, "succeeded"),
            Self::Failed     => write!(f, "failed"),
            Self::Retrying   => write!(f, "retrying"),
            Self::Skipped    => write!(f, "skipped"),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"    => Ok(Self::Pending),
            "ready"      => Ok(Self::Ready),
            "dispatched" => Ok(Self::Dispatched),
            "running"    => Ok(Self::Running),
            "succeeded"  => Ok(Self::Succeeded),
            "failed"     => Ok(Self::Failed),
            "retrying"   => Ok(Self::Retrying),
            "skipped"    => Ok(Self::Skipped),
            other        => Err(format!("unknown step status: {other}")),
        }
    }
}

/// What happens to the rest of a run when a step fails for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip everything not yet started and fail the run immediately.
    #[default]
    FailFast,
    /// Skip only the failed step's dependents; other branches keep going and
    /// the run may end in `PartialSuccess`.
    Tolerant,
}

// ---------------------------------------------------------------------------
// Lease / StepRun / WorkflowRun
// ---------------------------------------------------------------------------

/// Time-bounded exclusive claim a worker holds on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the run stopped scheduling; the holder should stop work.
    pub abandoned: bool,
}

/// One DAG node's execution within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRun {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub status: StepStatus,
    /// Zero-indexed; incremented on every retry.
    pub attempt_count: u32,
    pub lease: Option<Lease>,
    pub input: Value,
    pub output: Option<Value>,
    /// Realized cost over all attempts.
    pub cost_cents: i64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// When a Retrying step becomes Ready again.
    pub retry_at: Option<DateTime<Utc>>,
}

impl StepRun {
    pub fn pending(run_id: Uuid, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            node_id: node_id.into(),
            status: StepStatus::Pending,
            attempt_count: 0,
            lease: None,
            input: Value::Null,
            output: None,
            cost_cents: 0,
            error: None,
            started_at: None,
            ended_at: None,
            retry_at: None,
        }
    }
}

/// One execution of a workflow spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub spec_ref: SpecRef,
    pub status: RunStatus,
    pub budget_cents: Option<i64>,
    pub accumulated_cost_cents: i64,
    pub tags: Vec<String>,
    pub input: Value,
    pub policy: FailurePolicy,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// A fresh run with no budget, input or tags.
    pub fn queued(spec_ref: SpecRef, policy: FailurePolicy, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec_ref,
            status: RunStatus::Queued,
            budget_cents: None,
            accumulated_cost_cents: 0,
            tags: Vec::new(),
            input: Value::Null,
            policy,
            error: None,
            created_at,
            started_at: None,
            ended_at: None,
        }
    }
}

/// A run together with its steps, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunView {
    pub run: WorkflowRun,
    pub steps: Vec<StepRun>,
}

impl RunView {
    pub fn step(&self, node_id: &str) -> Option<&StepRun> {
        self.steps.iter().find(|s| s.node_id == node_id)
    }
}

// ---------------------------------------------------------------------------
// Worker protocol payloads
// ---------------------------------------------------------------------------

/// A leased step handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAssignment {
    pub step: StepRun,
    /// The lease this attempt runs under; results must quote its id.
    pub lease: Lease,
    pub kind: NodeKind,
    pub config: Value,
}

impl StepAssignment {
    pub fn step_id(&self) -> Uuid {
        self.step.id
    }

    pub fn lease_id(&self) -> Uuid {
        self.lease.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
    Failed,
}

fn default_retryable() -> bool {
    true
}

/// What a worker reports when it finishes an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Lease the attempt ran under.  Results quoting any other lease are
    /// discarded.
    pub lease_id: Uuid,
    pub status: ResultStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub actual_cost_cents: i64,
    #[serde(default)]
    pub error: Option<String>,
    /// `false` skips any remaining retries.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

impl StepResult {
    pub fn succeeded(lease_id: Uuid, output: Value, actual_cost_cents: i64) -> Self {
        Self {
            lease_id,
            status: ResultStatus::Succeeded,
            output: Some(output),
            actual_cost_cents,
            error: None,
            retryable: true,
        }
    }

    pub fn failed(lease_id: Uuid, error: impl Into<String>, actual_cost_cents: i64) -> Self {
        Self {
            lease_id,
            status: ResultStatus::Failed,
            output: None,
            actual_cost_cents,
            error: Some(error.into()),
            retryable: true,
        }
    }

    /// Mark a failure as permanent.
    pub fn fatal(mut self) -> Self {
        self.retryable = false;
        self
    }
}
