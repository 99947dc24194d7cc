//! Server configuration
//!
//! Process-level configuration for the orchestrator, loaded from YAML:
//!
//! ```yaml
//! domain: https://ci.example.com
//! repos:
//!   - threefoldtech/zeroCI
//!
//! timeouts:
//!   install: 3600
//!   style_check: 300
//!   test: 3600
//!
//! vcs:
//!   host: https://github.com
//!   api_url: https://api.github.com
//!   token: ghp_xxx
//!
//! chat:
//!   bot_token: "123:abc"
//!   chat_id: "-100200300"
//!
//! store:
//!   type: file
//!   path: .zeroci/runs
//!
//! run_configs:
//!   threefoldtech/zeroCI:
//!     DB_URL: postgres://ci
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::environment::{RunConfig, RunEnvironment};

/// Storage backend for runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory,
    File {
        #[serde(default = "default_store_path")]
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".zeroci/runs")
}

/// Upper bounds for each kind of step, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_long_timeout")]
    pub install: u64,
    #[serde(default = "default_style_timeout")]
    pub style_check: u64,
    #[serde(default = "default_long_timeout")]
    pub test: u64,
}

fn default_long_timeout() -> u64 {
    3600
}

fn default_style_timeout() -> u64 {
    300
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            install: default_long_timeout(),
            style_check: default_style_timeout(),
            test: default_long_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install)
    }

    pub fn style_check(&self) -> Duration {
        Duration::from_secs(self.style_check)
    }

    pub fn test(&self) -> Duration {
        Duration::from_secs(self.test)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Clone host, e.g. `https://github.com`
    #[serde(default = "default_vcs_host")]
    pub host: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub token: Option<String>,

    /// Context name for the run's commit status
    #[serde(default = "default_status_context")]
    pub status_context: String,
}

fn default_vcs_host() -> String {
    "https://github.com".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_status_context() -> String {
    "ZeroCI".to_string()
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            host: default_vcs_host(),
            api_url: default_api_url(),
            token: None,
            status_context: default_status_context(),
        }
    }
}

/// Telegram bot credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_chat_api")]
    pub api_url: String,
}

fn default_chat_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Directory under which each target gets its own work directory
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// File name a test step writes its JUnit report to
    #[serde(default = "default_report_file")]
    pub report_file: String,
}

fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("zeroci")
}

fn default_report_file() -> String {
    "test.xml".to_string()
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            work_root: default_work_root(),
            report_file: default_report_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL used for run links
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Where repositories are checked out on a target
    #[serde(default = "default_repos_dir")]
    pub repos_dir: String,

    /// Name of the CI file fetched from repositories
    #[serde(default = "default_config_file")]
    pub config_file: String,

    /// Repositories served by this instance
    #[serde(default)]
    pub repos: Vec<String>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub vcs: VcsConfig,

    /// Chat notifications; log-only when absent
    #[serde(default)]
    pub chat: Option<ChatConfig>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    /// Environment overrides keyed by repo or schedule name
    #[serde(default)]
    pub run_configs: BTreeMap<String, RunEnvironment>,
}

fn default_domain() -> String {
    "http://localhost:8080".to_string()
}

fn default_repos_dir() -> String {
    "/opt/code/vcs_repos".to_string()
}

fn default_config_file() -> String {
    "zeroCI.yaml".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            repos_dir: default_repos_dir(),
            config_file: default_config_file(),
            repos: Vec::new(),
            timeouts: TimeoutsConfig::default(),
            vcs: VcsConfig::default(),
            chat: None,
            store: StoreConfig::default(),
            provisioner: ProvisionerConfig::default(),
            run_configs: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Environment overrides as stored run configs
    pub fn run_config_entries(&self) -> Vec<RunConfig> {
        self.run_configs
            .iter()
            .map(|(name, env)| RunConfig {
                name: name.clone(),
                env: env.clone(),
            })
            .collect()
    }
}
