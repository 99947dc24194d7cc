//! Bridges to external collaborators
//!
//! The orchestrator talks to the outside world only through these traits:
//! - `Provisioner`: acquire a target, run commands on it, tear it down
//! - `VcsAdapter`: read files and branches, post commit statuses
//! - `ChatSender`: deliver a human-readable run notification
//! - `LiveBus`: publish live-status events for in-flight viewers
//!
//! Concrete implementations:
//! - `local`: targets are work directories on this host, steps run via `sh -c`
//! - `github`: GitHub REST API over reqwest
//! - `telegram`: Telegram bot API over reqwest, plus a log-only sender
//! - `bus`: in-process broadcast bus

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ci::{Prerequisites, RunEnvironment, RunStatus};
use crate::engine::StepOutcome;

pub mod bus;
pub mod github;
pub mod local;
pub mod telegram;

pub use bus::{BroadcastBus, BusMessage};
pub use github::GitHubAdapter;
pub use local::LocalProvisioner;
pub use telegram::{LogChatSender, TelegramSender};

/// Common error type for collaborator operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Request timed out")]
    Timeout,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A provisioned, isolated execution environment owned by one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    /// Working directory of the target, where steps start
    pub workdir: PathBuf,
    /// Checkout root owned by this target; the configured repos dir is
    /// used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos_dir: Option<PathBuf>,
}

impl Target {
    pub fn new(id: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            workdir: workdir.into(),
            repos_dir: None,
        }
    }

    pub fn with_repos_dir(mut self, repos_dir: impl Into<PathBuf>) -> Self {
        self.repos_dir = Some(repos_dir.into());
        self
    }

    /// Where repositories are checked out on this target
    pub fn checkout_root(&self, configured: &str) -> String {
        match &self.repos_dir {
            Some(dir) => dir.display().to_string(),
            None => configured.to_string(),
        }
    }
}

/// Provisioning backend
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Acquire a target matching `prerequisites`; `Ok(None)` when the
    /// backend has nothing to hand out.
    async fn provision(&self, prerequisites: &Prerequisites) -> Result<Option<Target>, BridgeError>;

    /// Run one shell command on the target, bounded by `timeout`.
    async fn run(
        &self,
        target: &Target,
        command: &str,
        env: &RunEnvironment,
        timeout: Duration,
    ) -> Result<StepOutcome, BridgeError>;

    /// Release the target and everything on it.
    async fn teardown(&self, target: &Target) -> Result<(), BridgeError>;
}

/// Commit status to attach to a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub state: RunStatus,
    pub link: String,
    pub context: String,
}

/// Version-control adapter
#[async_trait]
pub trait VcsAdapter: Send + Sync {
    /// Content of `path` at `git_ref`, `Ok(None)` when the file does not exist.
    async fn fetch_file(&self, repo: &str, git_ref: &str, path: &str)
        -> Result<Option<String>, BridgeError>;

    async fn list_branches(&self, repo: &str) -> Result<Vec<String>, BridgeError>;

    async fn post_status(
        &self,
        repo: &str,
        commit: &str,
        status: &CommitStatus,
    ) -> Result<(), BridgeError>;
}

/// A run notification for humans
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// Chat notification sender
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send(&self, message: &ChatMessage) -> Result<(), BridgeError>;
}

/// Live-update channel
#[async_trait]
pub trait LiveBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BridgeError>;
}
