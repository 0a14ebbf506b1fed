//! In-memory run state store.
//!
//! Every run is stored behind its own `tokio::sync::Mutex`, so transitions on
//! one run are totally ordered while different runs proceed in parallel.
//!
//! All mutation goes through [`RunStore::transition`]: the closure works on a
//! copy of the run's state and the copy is committed only if the closure
//! returns `Ok`.  A failed transition therefore leaves the record exactly as
//! it was before the call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::DbError;

/// Store of per-run state records of type `T`.
pub struct RunStore<T> {
    runs: RwLock<HashMap<Uuid, Arc<Mutex<T>>>>,
    /// Secondary ids (step ids) pointing at the run that owns them.
    aliases: RwLock<HashMap<Uuid, Uuid>>,
    /// Run ids in insertion order.
    order: RwLock<Vec<Uuid>>,
}

impl<T> Default for RunStore<T> {
    fn default() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }
}

impl<T> RunStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new run record together with the secondary ids that resolve
    /// to it.
    ///
    /// # Errors
    /// [`DbError::AlreadyExists`] if `run_id` or any alias is already known.
    pub async fn insert(
        &self,
        run_id: Uuid,
        state: T,
        aliases: impl IntoIterator<Item = Uuid>,
    ) -> Result<(), DbError> {
        let aliases: Vec<Uuid> = aliases.into_iter().collect();

        let mut runs = self.runs.write().await;
        if runs.contains_key(&run_id) {
            return Err(DbError::AlreadyExists(run_id));
        }

        let mut alias_map = self.aliases.write().await;
        if let Some(taken) = aliases.iter().find(|a| alias_map.contains_key(*a)) {
            return Err(DbError::AlreadyExists(*taken));
        }

        for alias in &aliases {
            alias_map.insert(*alias, run_id);
        }
        runs.insert(run_id, Arc::new(Mutex::new(state)));
        self.order.write().await.push(run_id);

        debug!(%run_id, aliases = aliases.len(), "run record inserted");
        Ok(())
    }

    /// Resolve a secondary id to the run that owns it.
    pub async fn run_id_for(&self, alias: Uuid) -> Result<Uuid, DbError> {
        self.aliases
            .read()
            .await
            .get(&alias)
            .copied()
            .ok_or(DbError::NotFound(alias))
    }

    /// Run ids in insertion order.
    pub async fn ids(&self) -> Vec<Uuid> {
        self.order.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read a run's state under its lock.
    pub async fn read<R>(&self, run_id: Uuid, f: impl FnOnce(&T) -> R) -> Result<R, DbError> {
        let cell = self.cell(run_id).await?;
        let guard = cell.lock().await;
        Ok(f(&guard))
    }

    async fn cell(&self, run_id: Uuid) -> Result<Arc<Mutex<T>>, DbError> {
        // The map lock is released before the run lock is taken.
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(DbError::NotFound(run_id))
    }
}

impl<T: Clone> RunStore<T> {
    /// Apply `f` to the run's state as one atomic transition.
    ///
    /// `f` receives a draft copy; the draft replaces the stored state only
    /// when `f` returns `Ok`.
    pub async fn transition<R, E>(
        &self,
        run_id: Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<DbError>,
    {
        let cell = self.cell(run_id).await?;
        let mut guard = cell.lock().await;

        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;

        Ok(out)
    }
}
