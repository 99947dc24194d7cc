//! In-memory stores
//!
//! `MemoryRunStore` and `MemoryRunConfigStore` satisfy the store contracts
//! without touching disk. Used by tests and by the `memory` store setting.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{check_append, check_transition, RunConfigStore, RunFilter, RunStore, RunSummary};
use super::{StoreError, StoreResult};
use crate::ci::{ResultEntry, Run, RunConfig, RunId, RunKind, RunMeta, RunStatus};

/// In-memory run store backed by a `HashMap<RunId, Run>`
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(&self, id: &RunId, f: impl FnOnce(&mut Run) -> StoreResult<T>) -> StoreResult<T> {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        let run = runs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        f(run)
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, kind: RunKind, meta: RunMeta) -> StoreResult<Run> {
        let run = Run::new(RunId::generate(), kind, meta);
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn append_result(&self, id: &RunId, entry: ResultEntry) -> StoreResult<()> {
        self.with_run(id, |run| {
            check_append(run)?;
            run.result.append(entry);
            Ok(())
        })
    }

    async fn set_status(&self, id: &RunId, status: RunStatus) -> StoreResult<()> {
        self.with_run(id, |run| {
            check_transition(run, status)?;
            run.status = status;
            Ok(())
        })
    }

    async fn get(&self, id: &RunId) -> StoreResult<Run> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        runs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn query(&self, filter: &RunFilter) -> StoreResult<Vec<RunSummary>> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        Ok(filter.apply(runs.values()))
    }
}

/// Run configs held in a list
#[derive(Debug, Default)]
pub struct MemoryRunConfigStore {
    configs: RwLock<Vec<RunConfig>>,
}

impl MemoryRunConfigStore {
    pub fn new(configs: Vec<RunConfig>) -> Self {
        Self {
            configs: RwLock::new(configs),
        }
    }

    pub fn insert(&self, config: RunConfig) {
        self.configs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(config);
    }
}

#[async_trait]
impl RunConfigStore for MemoryRunConfigStore {
    async fn find(&self, name: &str) -> StoreResult<Vec<RunConfig>> {
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        Ok(configs.iter().filter(|c| c.name == name).cloned().collect())
    }
}
