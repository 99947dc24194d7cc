//! Run records
//!
//! A run is one end-to-end CI execution. The three invocation contexts
//! (a VCS-triggered run, a named scheduled run and an ad-hoc project run)
//! share one record type; `RunKind` carries the identity fields and the
//! small capability set the pipeline branches on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger::ResultLedger;

/// Opaque run identifier, assigned by the store at creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn generate() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Run status and result-entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Success,
    Failure,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of `RunKind`, used for store queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKindTag {
    Triggered,
    Scheduled,
    Project,
}

/// Which invocation context created the run, with its identity fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunKind {
    /// A pushed commit on a watched repository
    Triggered {
        repo: String,
        branch: String,
        commit: String,
        committer: String,
    },
    /// A named job fired by the scheduler
    Scheduled { schedule_name: String },
    /// An ad-hoc project run
    Project { name: String },
}

impl RunKind {
    pub fn tag(&self) -> RunKindTag {
        match self {
            RunKind::Triggered { .. } => RunKindTag::Triggered,
            RunKind::Scheduled { .. } => RunKindTag::Scheduled,
            RunKind::Project { .. } => RunKindTag::Project,
        }
    }

    /// Only triggered runs read their CI file from the repository; the
    /// others receive install and test steps from the caller.
    pub fn fetches_config(&self) -> bool {
        matches!(self, RunKind::Triggered { .. })
    }

    /// Only triggered runs have a checked-out tree to lint.
    pub fn runs_style_check(&self) -> bool {
        matches!(self, RunKind::Triggered { .. })
    }

    /// Only triggered runs have a commit to attach a status to.
    pub fn posts_commit_status(&self) -> bool {
        matches!(self, RunKind::Triggered { .. })
    }

    /// Name under which environment overrides are stored for this run.
    pub fn environment_key(&self) -> &str {
        match self {
            RunKind::Triggered { repo, .. } => repo,
            RunKind::Scheduled { schedule_name } => schedule_name,
            RunKind::Project { name } => name,
        }
    }

    pub fn repo(&self) -> Option<&str> {
        match self {
            RunKind::Triggered { repo, .. } => Some(repo),
            _ => None,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            RunKind::Triggered { branch, .. } => Some(branch),
            _ => None,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            RunKind::Triggered { commit, .. } => Some(commit),
            _ => None,
        }
    }

    pub fn committer(&self) -> Option<&str> {
        match self {
            RunKind::Triggered { committer, .. } => Some(committer),
            _ => None,
        }
    }

    pub fn schedule_name(&self) -> Option<&str> {
        match self {
            RunKind::Scheduled { schedule_name } => Some(schedule_name),
            _ => None,
        }
    }

    pub fn project_name(&self) -> Option<&str> {
        match self {
            RunKind::Project { name } => Some(name),
            _ => None,
        }
    }
}

/// Optional fields supplied when a run is created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Artifact reference for a binary release built by this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_release: Option<String>,

    /// Human or automation actor that started the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// One execution instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub kind: RunKind,
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub result: ResultLedger,
    #[serde(flatten)]
    pub meta: RunMeta,
}

impl Run {
    /// A fresh pending run with an empty ledger
    pub fn new(id: RunId, kind: RunKind, meta: RunMeta) -> Self {
        Self {
            id,
            kind,
            timestamp: Utc::now(),
            status: RunStatus::Pending,
            result: ResultLedger::new(),
            meta,
        }
    }

    /// Whether a live viewer should keep polling this run
    pub fn is_live(&self) -> bool {
        self.status == RunStatus::Pending
    }

    /// Deterministic web link for this run
    pub fn link(&self, domain: &str) -> String {
        let domain = domain.trim_end_matches('/');
        match &self.kind {
            RunKind::Triggered { repo, branch, .. } => format!(
                "{}/repos/{}/{}/{}",
                domain,
                repo.replace('/', "%2F"),
                branch,
                self.id
            ),
            RunKind::Scheduled { schedule_name } => {
                format!("{}/schedules/{}?id={}", domain, schedule_name, self.id)
            }
            RunKind::Project { name } => format!("{}/projects/{}/{}", domain, name, self.id),
        }
    }

    /// Download link for the binary release, when this run produced one
    pub fn bin_link(&self, domain: &str) -> Option<String> {
        let release = self.meta.bin_release.as_ref()?;
        let (repo, branch) = (self.kind.repo()?, self.kind.branch()?);
        Some(format!(
            "{}/bin/{}/{}/{}",
            domain.trim_end_matches('/'),
            repo,
            branch,
            release
        ))
    }
}
