//! Budget enforcement.
//!
//! Two checkpoints: before dispatch the estimated cost must fit next to what
//! is already charged and what in-flight steps have reserved; on completion
//! the actual cost is charged, clamped so the run never goes over budget.

use crate::error::EngineError;
use crate::models::{NodeSpec, WorkflowRun};

/// Fail with [`EngineError::BudgetExceeded`] if dispatching `node` could push
/// the run over its budget.  Runs without a budget always pass.
pub fn check_dispatch(
    run: &WorkflowRun,
    reserved_cents: i64,
    node: &NodeSpec,
) -> Result<(), EngineError> {
    let Some(budget) = run.budget_cents else {
        return Ok(());
    };
    let committed = run.accumulated_cost_cents.saturating_add(reserved_cents);
    if committed.saturating_add(node.estimated_cost_cents) > budget {
        return Err(EngineError::BudgetExceeded {
            node_id: node.id.clone(),
            committed_cents: committed,
            estimated_cents: node.estimated_cost_cents,
            budget_cents: budget,
        });
    }
    Ok(())
}

/// Result of charging a completed step's cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub charged_cents: i64,
    /// Portion of the actual cost that did not fit in the budget.
    pub overrun_cents: i64,
}

/// Add `actual_cents` to the run's accumulated cost.
pub fn charge(run: &mut WorkflowRun, actual_cents: i64) -> Charge {
    let actual = actual_cents.max(0);
    let charged = match run.budget_cents {
        Some(budget) => actual.min((budget - run.accumulated_cost_cents).max(0)),
        None => actual,
    };
    run.accumulated_cost_cents = run.accumulated_cost_cents.saturating_add(charged);
    Charge {
        charged_cents: charged,
        overrun_cents: actual - charged,
    }
}
