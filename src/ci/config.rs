//! CI configuration read from a repository
//!
//! The CI file lives at the repository root (`zeroCI.yaml` by default):
//!
//! ```yaml
//! prequisties:
//!   image_name: ubuntu:18.04
//! install:
//!   - apt-get update
//!   - pip3 install -r requirements.txt
//! script:
//!   - pytest tests --junitxml=test.xml
//!   # - flake8
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::bridge::{BridgeError, VcsAdapter};

/// Opaque description of the environment to provision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prerequisites(pub Value);

impl Prerequisites {
    /// Base image requested by the CI file, if any
    pub fn image_name(&self) -> Option<&str> {
        self.0.get("image_name").and_then(Value::as_str)
    }
}

/// Parsed CI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiConfig {
    #[serde(default, rename = "prequisties", alias = "prerequisites")]
    pub prerequisites: Prerequisites,

    /// Commands joined into one installation unit
    #[serde(default, rename = "install")]
    pub install_steps: Vec<String>,

    /// Commands run and classified one by one
    #[serde(default, rename = "script")]
    pub test_steps: Vec<String>,
}

impl CiConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document is a config with nothing in it
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// The install commands as one shell unit
    pub fn install_script(&self) -> String {
        self.install_steps
            .iter()
            .map(|step| step.trim())
            .filter(|step| !step.is_empty())
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Whether a test-step line is commented out
pub fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Couldn't fetch {file}: {error}")]
    Fetch { file: String, error: BridgeError },

    #[error("Couldn't parse {file}: {error}")]
    Parse {
        file: String,
        error: serde_yaml::Error,
    },
}

/// Fetches and parses the CI file of a repository at a ref
pub struct ConfigResolver {
    vcs: Arc<dyn VcsAdapter>,
    file_name: String,
}

impl ConfigResolver {
    pub fn new(vcs: Arc<dyn VcsAdapter>, file_name: impl Into<String>) -> Self {
        Self {
            vcs,
            file_name: file_name.into(),
        }
    }

    /// `Ok(None)` when the repository has no CI file at `git_ref`.
    pub async fn resolve(&self, repo: &str, git_ref: &str) -> Result<Option<CiConfig>, ConfigError> {
        let content = self
            .vcs
            .fetch_file(repo, git_ref, &self.file_name)
            .await
            .map_err(|error| ConfigError::Fetch {
                file: self.file_name.clone(),
                error,
            })?;

        let Some(content) = content else {
            info!(repo, git_ref, file = %self.file_name, "No CI file found");
            return Ok(None);
        };

        let config = CiConfig::from_yaml(&content).map_err(|error| ConfigError::Parse {
            file: self.file_name.clone(),
            error,
        })?;
        debug!(
            repo,
            install_steps = config.install_steps.len(),
            test_steps = config.test_steps.len(),
            "Resolved CI config"
        );
        Ok(Some(config))
    }
}
