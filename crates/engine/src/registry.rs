//! Spec registry: immutable, versioned workflow definitions.
//!
//! Every `create` validates the DAG on its own and stores it as the next
//! version of that name.  Stored versions are never overwritten.  Names are
//! trimmed on the way in and on every lookup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::dag::validate_dag;
use crate::error::{EngineError, ValidationError};
use crate::models::{DagDefinition, Version, WorkflowSpec};

#[derive(Default)]
pub struct SpecRegistry {
    /// name → versions, oldest first (index `i` holds version `i + 1`).
    specs: RwLock<HashMap<String, Vec<Arc<WorkflowSpec>>>>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `dag` and store it as the next version of `name`, stamped
    /// with `now`.
    pub async fn create(
        &self,
        name: &str,
        dag: DagDefinition,
        now: DateTime<Utc>,
    ) -> Result<Arc<WorkflowSpec>, EngineError> {
        let name = normalize(name);
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        validate_dag(&dag.nodes)?;

        let mut specs = self.specs.write().await;
        let versions = specs.entry(name.to_owned()).or_default();
        let version = u32::try_from(versions.len() + 1)
            .map_err(|_| EngineError::Internal(format!("spec '{name}' has too many versions")))?;

        let spec = Arc::new(WorkflowSpec {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            version,
            description: dag.description,
            nodes: dag.nodes,
            created_at: now,
        });
        versions.push(Arc::clone(&spec));

        info!(spec = %name, version, nodes = spec.nodes.len(), "workflow spec registered");
        Ok(spec)
    }

    pub async fn get(&self, name: &str, version: Version) -> Result<Arc<WorkflowSpec>, EngineError> {
        let name = normalize(name);
        let specs = self.specs.read().await;
        let versions = specs.get(name);
        let found = match version {
            Version::Latest => versions.and_then(|v| v.last()),
            Version::Exact(n) => versions.and_then(|v| {
                n.checked_sub(1)
                    .and_then(|idx| v.get(usize::try_from(idx).ok()?))
            }),
        };
        found
            .cloned()
            .ok_or_else(|| EngineError::not_found("spec", format!("{name}@{version}")))
    }

    /// Latest version of every spec, sorted by name.
    pub async fn list_latest(&self) -> Vec<Arc<WorkflowSpec>> {
        let specs = self.specs.read().await;
        let mut latest: Vec<Arc<WorkflowSpec>> =
            specs.values().filter_map(|v| v.last().cloned()).collect();
        latest.sort_by(|a, b| a.name.cmp(&b.name));
        latest
    }

    /// Every stored version of `name`, oldest first.
    pub async fn versions(&self, name: &str) -> Result<Vec<Arc<WorkflowSpec>>, EngineError> {
        let name = normalize(name);
        self.specs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found("spec", name))
    }
}

fn normalize(name: &str) -> &str {
    name.trim()
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::models::NodeSpec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn dag(ids: &[&str]) -> DagDefinition {
        DagDefinition::new(ids.iter().map(|id| NodeSpec::new(*id)).collect())
    }

    #[tokio::test]
    async fn versions_increase_per_name() {
        let registry = SpecRegistry::new();
        let v1 = registry.create("ingest", dag(&["a"]), t0()).await.expect("v1");
        let v2 = registry.create("ingest", dag(&["a", "b"]), t0()).await.expect("v2");
        let other = registry.create("report", dag(&["x"]), t0()).await.expect("other");

        assert_eq!((v1.version, v2.version, other.version), (1, 2, 1));

        let latest = registry.get("ingest", Version::Latest).await.expect("latest");
        assert_eq!(latest.nodes.len(), 2);
        let first = registry.get("ingest", Version::Exact(1)).await.expect("exact");
        assert_eq!(first.id, v1.id);
    }

    #[tokio::test]
    async fn invalid_dag_does_not_consume_a_version() {
        let registry = SpecRegistry::new();
        let cyclic = DagDefinition::new(vec![
            NodeSpec::new("a").depends_on(["b"]),
            NodeSpec::new("b").depends_on(["a"]),
        ]);
        let err = registry.create("wf", cyclic, t0()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::CycleDetected(_))
        ));

        let ok = registry.create("wf", dag(&["a"]), t0()).await.expect("valid");
        assert_eq!(ok.version, 1);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let registry = SpecRegistry::new();
        let err = registry.create("  ", dag(&["a"]), t0()).await.unwrap_err();
        assert_eq!(err, EngineError::Validation(ValidationError::EmptyName));
    }

    #[tokio::test]
    async fn missing_specs_and_versions_are_not_found() {
        let registry = SpecRegistry::new();
        registry.create("wf", dag(&["a"]), t0()).await.expect("v1");

        for (name, version) in [
            ("nope", Version::Latest),
            ("wf", Version::Exact(0)),
            ("wf", Version::Exact(2)),
        ] {
            assert!(matches!(
                registry.get(name, version).await,
                Err(EngineError::NotFound { kind: "spec", .. })
            ));
        }
    }

    #[tokio::test]
    async fn names_are_trimmed_on_every_lookup() {
        let registry = SpecRegistry::new();
        let created = registry.create(" wf ", dag(&["a"]), t0()).await.expect("create");
        assert_eq!(created.name, "wf");
        assert_eq!(created.created_at, t0());

        let found = registry.get(" wf", Version::Latest).await.expect("get");
        assert_eq!(found.id, created.id);
        assert_eq!(registry.versions("wf ").await.expect("versions").len(), 1);
    }

    #[tokio::test]
    async fn list_latest_is_sorted_by_name() {
        let registry = SpecRegistry::new();
        registry.create("zeta", dag(&["a"]), t0()).await.expect("zeta");
        registry.create("alpha", dag(&["a"]), t0()).await.expect("alpha v1");
        registry.create("alpha", dag(&["a"]), t0()).await.expect("alpha v2");

        let listed: Vec<(String, u32)> = registry
            .list_latest()
            .await
            .iter()
            .map(|s| (s.name.clone(), s.version))
            .collect();
        assert_eq!(listed, vec![("alpha".into(), 2), ("zeta".into(), 1)]);
        assert_eq!(registry.versions("alpha").await.expect("versions").len(), 2);
    }
}
