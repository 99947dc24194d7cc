//! Read-side queries
//!
//! What a dashboard or the CLI asks about runs. Framework-free: a web layer
//! serializes these results as JSON.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeError, VcsAdapter};
use crate::ci::{ResultLedger, RunId, RunKindTag, RunStatus};
use crate::store::{RunFilter, RunStore, RunSummary, StoreError};

/// Branch a badge reports on when none is given
pub const DEFAULT_BADGE_BRANCH: &str = "master";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("VCS error: {0}")]
    Vcs(#[from] BridgeError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overview {
    pub repos: Vec<String>,
    pub schedules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branches {
    /// Branches the VCS currently lists
    pub exist: Vec<String>,
    /// Branches that only survive in stored runs
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetails {
    /// Whether the run is still in progress
    pub live: bool,
    pub result: ResultLedger,
}

/// What a status badge shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub status: RunStatus,
    pub passing: bool,
    pub link: String,
}

/// Which runs a badge summarizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BadgeSubject {
    Branch { repo: String, branch: Option<String> },
    Schedule(String),
}

pub struct StatusApi {
    store: Arc<dyn RunStore>,
    vcs: Arc<dyn VcsAdapter>,
    repos: Vec<String>,
    domain: String,
}

impl StatusApi {
    pub fn new(
        store: Arc<dyn RunStore>,
        vcs: Arc<dyn VcsAdapter>,
        repos: Vec<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vcs,
            repos,
            domain: domain.into(),
        }
    }

    /// Served repositories and every schedule name seen so far
    pub async fn overview(&self) -> Result<Overview, ApiError> {
        let runs = self
            .store
            .query(&RunFilter::kind(RunKindTag::Scheduled))
            .await?;
        let schedules: BTreeSet<String> = runs
            .iter()
            .filter_map(|run| run.kind.schedule_name().map(str::to_string))
            .collect();

        Ok(Overview {
            repos: self.repos.clone(),
            schedules: schedules.into_iter().collect(),
        })
    }

    pub async fn branches(&self, repo: &str) -> Result<Branches, ApiError> {
        let exist = self.vcs.list_branches(repo).await?;
        let known: BTreeSet<String> = self
            .store
            .query(&RunFilter::repo(repo))
            .await?
            .iter()
            .filter_map(|run| run.kind.branch().map(str::to_string))
            .collect();
        let deleted = known
            .into_iter()
            .filter(|branch| !exist.contains(branch))
            .collect();

        Ok(Branches { exist, deleted })
    }

    pub async fn branch_runs(&self, repo: &str, branch: &str) -> Result<Vec<RunSummary>, ApiError> {
        Ok(self
            .store
            .query(&RunFilter::branch(repo, branch).newest_first())
            .await?)
    }

    pub async fn schedule_runs(&self, name: &str) -> Result<Vec<RunSummary>, ApiError> {
        Ok(self
            .store
            .query(&RunFilter::schedule(name).newest_first())
            .await?)
    }

    pub async fn project_runs(&self, name: &str) -> Result<Vec<RunSummary>, ApiError> {
        Ok(self
            .store
            .query(&RunFilter::project(name).newest_first())
            .await?)
    }

    pub async fn run_details(&self, id: &RunId) -> Result<RunDetails, ApiError> {
        let run = self.store.get(id).await?;
        Ok(RunDetails {
            live: run.is_live(),
            result: run.result,
        })
    }

    /// Latest finished run for `subject`, `None` when nothing has finished
    pub async fn badge(&self, subject: &BadgeSubject) -> Result<Option<Badge>, ApiError> {
        let filter = match subject {
            BadgeSubject::Branch { repo, branch } => RunFilter::branch(
                repo.as_str(),
                branch.as_deref().unwrap_or(DEFAULT_BADGE_BRANCH),
            ),
            BadgeSubject::Schedule(name) => RunFilter::schedule(name.as_str()),
        };
        let latest = self
            .store
            .query(&filter.terminal().newest_first().limit(1))
            .await?;

        let Some(summary) = latest.into_iter().next() else {
            return Ok(None);
        };
        let run = self.store.get(&summary.id).await?;
        Ok(Some(Badge {
            status: run.status,
            passing: run.status == RunStatus::Success,
            link: run.link(&self.domain),
        }))
    }
}
