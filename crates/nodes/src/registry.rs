//! Kind → executor mapping.

use std::sync::Arc;

use crate::{NodeKind, StepExecutor};

/// One executor per [`NodeKind`].
#[derive(Clone)]
pub struct ExecutorSet {
    llm: Arc<dyn StepExecutor>,
    function: Arc<dyn StepExecutor>,
    tool: Arc<dyn StepExecutor>,
}

impl ExecutorSet {
    pub fn new(
        llm: Arc<dyn StepExecutor>,
        function: Arc<dyn StepExecutor>,
        tool: Arc<dyn StepExecutor>,
    ) -> Self {
        Self { llm, function, tool }
    }

    /// Use the same executor for every kind.
    pub fn uniform(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            llm: Arc::clone(&executor),
            function: Arc::clone(&executor),
            tool: executor,
        }
    }

    pub fn for_kind(&self, kind: NodeKind) -> &dyn StepExecutor {
        match kind {
            NodeKind::Llm => self.llm.as_ref(),
            NodeKind::Function => self.function.as_ref(),
            NodeKind::Tool => self.tool.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::*;
    use crate::mock::MockExecutor;
    use crate::ExecutionContext;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            run_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            node_id: "n".into(),
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn each_kind_routes_to_its_executor() {
        let llm = Arc::new(MockExecutor::returning("llm", json!({}), 15));
        let function = Arc::new(MockExecutor::returning("function", json!({}), 0));
        let tool = Arc::new(MockExecutor::returning("tool", json!({}), 5));
        let set = ExecutorSet::new(llm.clone(), function.clone(), tool.clone());

        let out = set
            .for_kind(NodeKind::Llm)
            .execute(&Value::Null, json!({}), &ctx())
            .await
            .expect("llm executes");
        assert_eq!(out.cost_cents, 15);
        assert_eq!(out.output["executor"], "llm");

        set.for_kind(NodeKind::Tool)
            .execute(&Value::Null, json!({}), &ctx())
            .await
            .expect("tool executes");

        assert_eq!(llm.call_count(), 1);
        assert_eq!(function.call_count(), 0);
        assert_eq!(tool.call_count(), 1);
    }

    #[tokio::test]
    async fn uniform_set_shares_one_executor() {
        let shared = Arc::new(MockExecutor::returning("shared", json!({}), 1));
        let set = ExecutorSet::uniform(shared.clone());
        for kind in NodeKind::ALL {
            set.for_kind(kind)
                .execute(&Value::Null, json!({}), &ctx())
                .await
                .expect("executes");
        }
        assert_eq!(shared.call_count(), 3);
    }
}
