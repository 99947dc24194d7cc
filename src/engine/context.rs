//! Collaborator context
//!
//! Everything a pipeline talks to, built once by the process entry point
//! and handed to `Pipeline::new`. There are no global handles.

use std::sync::Arc;

use tracing::info;

use super::error::SetupError;
use crate::bridge::{
    BroadcastBus, ChatSender, GitHubAdapter, LiveBus, LocalProvisioner, LogChatSender,
    Provisioner, TelegramSender, VcsAdapter,
};
use crate::ci::{ServerConfig, StoreConfig, TimeoutsConfig};
use crate::store::{FileRunStore, MemoryRunConfigStore, MemoryRunStore, RunConfigStore, RunStore};

/// Plain settings the pipeline reads
#[derive(Debug, Clone)]
pub struct CiSettings {
    /// Base URL for run links
    pub domain: String,
    /// Checkout root on targets that don't bring their own
    pub repos_dir: String,
    /// Clone host for triggered runs
    pub vcs_host: String,
    /// CI file name fetched from repositories
    pub config_file: String,
    pub timeouts: TimeoutsConfig,
    /// Commit-status context of the run verdict
    pub status_context: String,
}

impl From<&ServerConfig> for CiSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            repos_dir: config.repos_dir.clone(),
            vcs_host: config.vcs.host.clone(),
            config_file: config.config_file.clone(),
            timeouts: config.timeouts,
            status_context: config.vcs.status_context.clone(),
        }
    }
}

impl Default for CiSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

#[derive(Clone)]
pub struct CiContext {
    pub provisioner: Arc<dyn Provisioner>,
    pub vcs: Arc<dyn VcsAdapter>,
    pub chat: Arc<dyn ChatSender>,
    pub store: Arc<dyn RunStore>,
    pub run_configs: Arc<dyn RunConfigStore>,
    pub bus: Arc<dyn LiveBus>,
    pub settings: CiSettings,
}

impl CiContext {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        vcs: Arc<dyn VcsAdapter>,
        chat: Arc<dyn ChatSender>,
        store: Arc<dyn RunStore>,
        run_configs: Arc<dyn RunConfigStore>,
        bus: Arc<dyn LiveBus>,
    ) -> Self {
        Self {
            provisioner,
            vcs,
            chat,
            store,
            run_configs,
            bus,
            settings: CiSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CiSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the concrete collaborators named by `config`
    ///
    /// The returned bus is the same one the context publishes to, so the
    /// caller can subscribe to live events.
    pub async fn from_server_config(
        config: &ServerConfig,
    ) -> Result<(Self, BroadcastBus), SetupError> {
        let provisioner = Arc::new(LocalProvisioner::from_config(&config.provisioner));
        let vcs = Arc::new(GitHubAdapter::from_config(&config.vcs)?);

        let chat: Arc<dyn ChatSender> = match &config.chat {
            Some(chat) => Arc::new(TelegramSender::from_config(chat)?),
            None => {
                info!("No chat bot configured, notifications go to the log");
                Arc::new(LogChatSender)
            }
        };

        let store: Arc<dyn RunStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryRunStore::new()),
            StoreConfig::File { path } => Arc::new(FileRunStore::open(path).await?),
        };

        let run_configs = Arc::new(MemoryRunConfigStore::new(config.run_config_entries()));
        let bus = BroadcastBus::default();

        let context = Self::new(
            provisioner,
            vcs,
            chat,
            store,
            run_configs,
            Arc::new(bus.clone()),
        )
        .with_settings(CiSettings::from(config));

        Ok((context, bus))
    }
}
