//! `SimulatedExecutor` drives its behaviour from the node's own config.
//!
//! Recognised config keys:
//! - `cost_cents`    — cost reported on success (default 0).
//! - `delay_ms`      — simulated work time (default 0).
//! - `fail_attempts` — the first N attempts fail with a retryable error.
//! - `fatal`         — every attempt fails with this fatal message.
//! - `output`        — object merged into the produced output.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{ExecutionContext, ExecutionOutput, NodeError, NodeKind, StepExecutor};

pub struct SimulatedExecutor {
    kind: NodeKind,
}

impl SimulatedExecutor {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl StepExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        config: &Value,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutput, NodeError> {
        let delay_ms = config.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(msg) = config.get("fatal").and_then(Value::as_str) {
            return Err(NodeError::Fatal(msg.to_owned()));
        }

        let fail_attempts = config.get("fail_attempts").and_then(Value::as_u64).unwrap_or(0);
        if u64::from(ctx.attempt) < fail_attempts {
            debug!(node_id = %ctx.node_id, attempt = ctx.attempt, "simulated transient failure");
            return Err(NodeError::Retryable(format!(
                "simulated failure on attempt {}",
                ctx.attempt
            )));
        }

        let mut output = json!({
            "node": ctx.node_id,
            "kind": self.kind,
            "attempt": ctx.attempt,
            "input": input,
        });
        if let (Some(out_obj), Some(extra)) = (
            output.as_object_mut(),
            config.get("output").and_then(Value::as_object),
        ) {
            for (k, v) in extra {
                out_obj.insert(k.clone(), v.clone());
            }
        }

        Ok(ExecutionOutput {
            output,
            cost_cents: config.get("cost_cents").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn ctx(attempt: u32) -> ExecutionContext {
        ExecutionContext {
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            node_id: "collector".into(),
            attempt,
        }
    }

    #[tokio::test]
    async fn reports_configured_cost_and_output() {
        let exec = SimulatedExecutor::new(NodeKind::Tool);
        let config = json!({ "cost_cents": 200, "output": { "rows": 3 } });

        let out = exec
            .execute(&config, json!({ "q": 1 }), &ctx(0))
            .await
            .expect("succeeds");

        assert_eq!(out.cost_cents, 200);
        assert_eq!(out.output["rows"], 3);
        assert_eq!(out.output["kind"], "tool");
        assert_eq!(out.output["input"]["q"], 1);
    }

    #[tokio::test]
    async fn fails_transiently_for_first_attempts() {
        let exec = SimulatedExecutor::new(NodeKind::Llm);
        let config = json!({ "fail_attempts": 2 });

        for attempt in 0..2 {
            let err = exec.execute(&config, json!({}), &ctx(attempt)).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(exec.execute(&config, json!({}), &ctx(2)).await.is_ok());
    }

    #[tokio::test]
    async fn fatal_config_always_fails() {
        let exec = SimulatedExecutor::new(NodeKind::Function);
        let config = json!({ "fatal": "bad credentials" });

        let err = exec.execute(&config, json!({}), &ctx(0)).await.unwrap_err();
        assert_eq!(err, NodeError::Fatal("bad credentials".into()));
    }
}
