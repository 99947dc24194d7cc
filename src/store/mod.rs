//! Run persistence
//!
//! These traits define the storage seams of the orchestrator:
//! - `RunStore`: runs and their append-only result ledgers
//! - `RunConfigStore`: named environment overrides
//!
//! `MemoryRunStore` keeps everything in process; `FileRunStore` writes one
//! JSON document per run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ci::{ResultEntry, Run, RunConfig, RunId, RunKind, RunKindTag, RunMeta, RunStatus};

pub mod file;
pub mod memory;

pub use file::FileRunStore;
pub use memory::{MemoryRunConfigStore, MemoryRunStore};

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("Invalid run id: {0:?}")]
    InvalidId(RunId),

    #[error("Run {id} already finished with status {status}")]
    StatusFrozen { id: RunId, status: RunStatus },

    #[error("Invalid status for run {id}: {status}")]
    InvalidStatus { id: RunId, status: RunStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query over stored runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub kind: Option<RunKindTag>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub schedule_name: Option<String>,
    pub project_name: Option<String>,
    /// Empty means any status
    pub statuses: Vec<RunStatus>,
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn repo(repo: impl Into<String>) -> Self {
        Self {
            kind: Some(RunKindTag::Triggered),
            repo: Some(repo.into()),
            ..Default::default()
        }
    }

    pub fn branch(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Self::repo(repo)
        }
    }

    pub fn schedule(name: impl Into<String>) -> Self {
        Self {
            kind: Some(RunKindTag::Scheduled),
            schedule_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn project(name: impl Into<String>) -> Self {
        Self {
            kind: Some(RunKindTag::Project),
            project_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn kind(kind: RunKindTag) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Only runs that reached a terminal status
    pub fn terminal(mut self) -> Self {
        self.statuses = vec![RunStatus::Success, RunStatus::Failure, RunStatus::Error];
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, run: &Run) -> bool {
        fn field_matches(wanted: &Option<String>, actual: Option<&str>) -> bool {
            wanted.as_deref().map_or(true, |w| actual == Some(w))
        }

        self.kind.map_or(true, |k| run.kind.tag() == k)
            && field_matches(&self.repo, run.kind.repo())
            && field_matches(&self.branch, run.kind.branch())
            && field_matches(&self.schedule_name, run.kind.schedule_name())
            && field_matches(&self.project_name, run.kind.project_name())
            && (self.statuses.is_empty() || self.statuses.contains(&run.status))
    }

    /// Filter, order and limit a set of runs into projections
    pub fn apply<'a>(&self, runs: impl Iterator<Item = &'a Run>) -> Vec<RunSummary> {
        let mut matched: Vec<&Run> = runs.filter(|run| self.matches(run)).collect();
        matched.sort_by_key(|run| run.timestamp);
        if self.newest_first {
            matched.reverse();
        }
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched.into_iter().map(RunSummary::from).collect()
    }
}

/// A run without its ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub kind: RunKind,
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(flatten)]
    pub meta: RunMeta,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            kind: run.kind.clone(),
            timestamp: run.timestamp,
            status: run.status,
            meta: run.meta.clone(),
        }
    }
}

/// Persistent store for runs and their ledgers
///
/// Guarantees:
/// - `append_result` keeps entries in append order and is rejected once the
///   run is terminal.
/// - `set_status` only moves `pending` to a terminal status; rewriting a
///   terminal status with the same value is accepted, anything else is
///   `StatusFrozen`.
/// - `get` returns a consistent snapshot of status and ledger.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a pending run with an empty ledger and a fresh id.
    async fn create(&self, kind: RunKind, meta: RunMeta) -> StoreResult<Run>;

    async fn append_result(&self, id: &RunId, entry: ResultEntry) -> StoreResult<()>;

    async fn set_status(&self, id: &RunId, status: RunStatus) -> StoreResult<()>;

    async fn get(&self, id: &RunId) -> StoreResult<Run>;

    async fn query(&self, filter: &RunFilter) -> StoreResult<Vec<RunSummary>>;
}

/// Lookup of named environment overrides
#[async_trait]
pub trait RunConfigStore: Send + Sync {
    /// Every stored config whose name equals `name`.
    async fn find(&self, name: &str) -> StoreResult<Vec<RunConfig>>;
}

pub(crate) fn check_append(run: &Run) -> StoreResult<()> {
    if run.status.is_terminal() {
        return Err(StoreError::StatusFrozen {
            id: run.id.clone(),
            status: run.status,
        });
    }
    Ok(())
}

pub(crate) fn check_transition(run: &Run, status: RunStatus) -> StoreResult<()> {
    if !status.is_terminal() {
        return Err(StoreError::InvalidStatus {
            id: run.id.clone(),
            status,
        });
    }
    if run.status.is_terminal() && run.status != status {
        return Err(StoreError::StatusFrozen {
            id: run.id.clone(),
            status: run.status,
        });
    }
    Ok(())
}
