//! `engine` crate — domain models, DAG validation, the spec registry and the
//! run/step state machine.
//!
//! Nothing here does I/O.  The scheduler is a set of pure transitions on a
//! [`RunState`]; the `queue` crate applies them under the run store's
//! per-run lock.

pub mod budget;
pub mod clock;
pub mod config;
pub mod dag;
pub mod error;
pub mod models;
pub mod registry;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OrchestratorConfig;
pub use dag::{validate_dag, Topology};
pub use error::{EngineError, ValidationError};
pub use models::{
    DagDefinition, FailurePolicy, Lease, NodeSpec, ResultStatus, RunStatus, RunView, SpecRef,
    StepAssignment, StepResult, StepRun, StepStatus, Version, WorkflowRun, WorkflowSpec,
};
pub use registry::SpecRegistry;
pub use scheduler::{
    CompletionOutcome, DispatchOutcome, HeartbeatOutcome, RunState, SweepOutcome,
};
