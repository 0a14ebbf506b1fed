//! `MockExecutor` — a test double for `StepExecutor`.
//!
//! Records every input it receives and returns a programmer-specified result.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecutionContext, ExecutionOutput, NodeError, StepExecutor};

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Succeed with a specific JSON value and cost.
    ReturnValue { value: Value, cost_cents: i64 },
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

pub struct MockExecutor {
    /// Label echoed in the output under `"executor"`.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// All inputs seen by this executor (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockExecutor {
    /// Create a mock that always succeeds with the given value and cost.
    pub fn returning(name: impl Into<String>, value: Value, cost_cents: i64) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue { value, cost_cents })
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this executor has run.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionOutput, NodeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(input);
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue { value, cost_cents } => {
                // Tag the output with the executor name so tests can trace
                // which executor produced it.
                let mut out = json!({ "executor": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), value.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(ExecutionOutput {
                    output: out,
                    cost_cents: *cost_cents,
                })
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }
}
