//! CI orchestration engine
//!
//! This module contains:
//! - `pipeline` - The run state machine and run requests
//! - `context` - Collaborator context handed to the pipeline
//! - `executor` - Step execution over the provisioning backend
//! - `classifier` - Step outcome to ledger entry
//! - `notifier` - Live events, commit statuses and chat messages
//! - `stage` - Pipeline stages and the per-run stage tracker
//! - `result` - Step outcomes
//! - `error` - Pipeline errors and the run failure taxonomy

pub mod classifier;
pub mod context;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod pipeline;
pub mod result;
pub mod stage;

pub use classifier::{ResultClassifier, STYLE_ENTRY_NAME};
pub use context::{CiContext, CiSettings};
pub use error::{PipelineError, RunFailure, SetupError};
pub use executor::StepExecutor;
pub use notifier::{
    report_message, NotificationDispatcher, StatusEvent, STATUS_TOPIC, STYLE_STATUS_CONTEXT,
};
pub use pipeline::{
    checkout_prefix, style_command, ConfigSource, Pipeline, PipelineOutcome, RunRequest,
};
pub use result::{StepOutcome, TIMEOUT_EXIT_STATUS};
pub use stage::{PipelineStage, StageTracker};
