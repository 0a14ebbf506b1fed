//! Request payloads accepted by the control plane.

use engine::{FailurePolicy, RunStatus, SpecRef, WorkflowRun};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub spec: SpecRef,
    /// Spending cap in cents; `None` means unlimited.
    #[serde(default)]
    pub budget_cents: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub input: Value,
    /// Falls back to the configured default policy.
    #[serde(default)]
    pub policy: Option<FailurePolicy>,
}

impl SubmitRequest {
    pub fn new(spec: SpecRef) -> Self {
        Self {
            spec,
            budget_cents: None,
            tags: Vec::new(),
            input: Value::Null,
            policy: None,
        }
    }

    pub fn budget(mut self, cents: i64) -> Self {
        self.budget_cents = Some(cents);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Narrows `list_runs`; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFilter {
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub spec_name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl RunFilter {
    pub fn matches(&self, run: &WorkflowRun) -> bool {
        self.status.map_or(true, |s| run.status == s)
            && self
                .spec_name
                .as_deref()
                .map_or(true, |name| run.spec_ref.name == name)
            && self
                .tag
                .as_deref()
                .map_or(true, |tag| run.tags.iter().any(|t| t == tag))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn submit_request_parses_with_defaults() {
        let req: SubmitRequest =
            serde_json::from_str(r#"{"spec":{"name":"research"}}"#).expect("parse");
        assert_eq!(req, SubmitRequest::new(SpecRef::latest("research")));
    }

    #[test]
    fn filter_matches_on_every_set_field() {
        let mut run = WorkflowRun::queued(SpecRef::exact("research", 2), FailurePolicy::FailFast, Utc::now());
        run.tags = vec!["nightly".into()];

        assert!(RunFilter::default().matches(&run));
        assert!(RunFilter { tag: Some("nightly".into()), ..Default::default() }.matches(&run));
        assert!(!RunFilter { spec_name: Some("other".into()), ..Default::default() }.matches(&run));
        assert!(!RunFilter { status: Some(RunStatus::Running), ..Default::default() }.matches(&run));
    }
}
