//! # ZeroCI
//!
//! A continuous-integration orchestrator. For every run it provisions an
//! isolated target, installs the project, optionally checks formatting,
//! runs the test steps one by one, aggregates their results into one
//! verdict, tears the target down and reports the outcome.
//!
//! ## Run kinds
//!
//! - **Triggered**: a pushed commit; the CI file (`zeroCI.yaml`) is read from
//!   the repository and the tree is formatting-checked
//! - **Scheduled**: a named job with install and test steps supplied by the
//!   scheduler
//! - **Project**: an ad-hoc run with supplied steps
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zeroci::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load_server_config("zeroci.yaml".as_ref())?;
//!     let (context, _bus) = CiContext::from_server_config(&config).await?;
//!     let pipeline = Pipeline::new(context);
//!
//!     let outcome = pipeline
//!         .submit(RunRequest::triggered("org/repo", "main", "abc123", "ada"))
//!         .await?;
//!     println!("Run {} finished: {}", outcome.run.id, outcome.run.status);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bridge;
pub mod ci;
pub mod engine;
pub mod store;

// Re-export main types
pub use api::{ApiError, Badge, BadgeSubject, Branches, Overview, RunDetails, StatusApi};
pub use bridge::{
    BridgeError, BroadcastBus, ChatMessage, ChatSender, CommitStatus, GitHubAdapter, LiveBus,
    LocalProvisioner, LogChatSender, Provisioner, Target, TelegramSender, VcsAdapter,
};
pub use ci::{
    CiConfig, ConfigLoader, EntryType, LoadError, ResultEntry, ResultLedger, Run, RunId, RunKind,
    RunStatus, ServerConfig,
};
pub use engine::{
    CiContext, ConfigSource, NotificationDispatcher, Pipeline, PipelineError, PipelineOutcome,
    PipelineStage, ResultClassifier, RunFailure, RunRequest, StepExecutor, StepOutcome,
};
pub use store::{FileRunStore, MemoryRunStore, RunFilter, RunStore, RunSummary, StoreError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{BadgeSubject, StatusApi};
    pub use crate::bridge::{ChatSender, LiveBus, Provisioner, VcsAdapter};
    pub use crate::ci::{
        CiConfig, ConfigLoader, ResultEntry, Run, RunId, RunKind, RunStatus, ScheduleDefinition,
        ServerConfig,
    };
    pub use crate::engine::{CiContext, Pipeline, PipelineOutcome, RunRequest};
    pub use crate::store::{RunFilter, RunStore};
}
