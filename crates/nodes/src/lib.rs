//! `nodes` crate — the executor capability workers use to run a step.
//!
//! A node's kind is a closed [`NodeKind`] enum.  [`ExecutorSet`] maps every
//! kind to a [`StepExecutor`] with an exhaustive `match`, so adding a kind is
//! a compile error until every executor set handles it.

pub mod error;
pub mod kind;
pub mod mock;
pub mod registry;
pub mod simulated;
pub mod traits;

pub use error::NodeError;
pub use kind::NodeKind;
pub use registry::ExecutorSet;
pub use traits::{ExecutionContext, ExecutionOutput, StepExecutor};
