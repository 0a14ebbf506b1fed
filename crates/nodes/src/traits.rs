//! The `StepExecutor` trait — the contract every executor must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::NodeError;

/// Identity of the step being executed.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub step_id: Uuid,
    pub node_id: String,
    /// Zero-indexed attempt number.
    pub attempt: u32,
}

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub output: Value,
    /// Realized cost in integer cents.
    pub cost_cents: i64,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one attempt of a step.
    ///
    /// `config` is the node's static configuration, `input` is the step input
    /// resolved by the control plane at dispatch time.
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutput, NodeError>;
}
