//! Pipeline error types

use crate::bridge::BridgeError;
use crate::ci::{ConfigError, ResultEntry, RunStatus};
use crate::store::StoreError;

/// Errors that stop the orchestrator itself from driving a run
///
/// A run that fails is not an error here; its failure is recorded in the
/// ledger. Only losing the authoritative store is.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors building the collaborators from process configuration
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Collaborator setup failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Store setup failed: {0}")]
    Store(#[from] StoreError),
}

/// Conditions that end a run early with status `error`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunFailure {
    #[error("Didn't find something to install")]
    ConfigAbsent,

    #[error("{0}")]
    ConfigParse(String),

    #[error("{0}")]
    ConfigFetch(String),

    #[error("Couldn't deploy a vm")]
    ProvisionFailure,

    #[error("Installation failed")]
    InstallFailure { output: String },
}

impl RunFailure {
    /// Name of the ledger entry explaining this failure
    pub fn entry_name(&self) -> &'static str {
        match self {
            RunFailure::ConfigAbsent | RunFailure::ConfigParse(_) | RunFailure::ConfigFetch(_) => {
                "ZeroCI"
            }
            RunFailure::ProvisionFailure => "Deploy",
            RunFailure::InstallFailure { .. } => "Installation",
        }
    }

    /// The human-readable ledger entry for this failure
    pub fn entry(&self) -> ResultEntry {
        let content = match self {
            RunFailure::InstallFailure { output } => output.clone(),
            other => other.to_string(),
        };
        ResultEntry::log(self.entry_name(), RunStatus::Error, content)
    }
}

impl From<ConfigError> for RunFailure {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Fetch { .. } => RunFailure::ConfigFetch(error.to_string()),
            ConfigError::Parse { .. } => RunFailure::ConfigParse(error.to_string()),
        }
    }
}
