//! CI data model
//!
//! This module contains the types a run is made of and the inputs it is
//! built from:
//! - `run` - Run, RunKind, RunStatus and RunId
//! - `ledger` - ResultEntry and the append-only ResultLedger
//! - `report` - JUnit XML structured test reports
//! - `config` - CiConfig and the ConfigResolver
//! - `environment` - RunEnvironment and the EnvironmentResolver
//! - `server_config` - Process configuration
//! - `loader` - Load configuration and schedules from files

pub mod config;
pub mod environment;
pub mod ledger;
pub mod loader;
pub mod report;
pub mod run;
pub mod server_config;

pub use config::{is_comment, CiConfig, ConfigError, ConfigResolver, Prerequisites};
pub use environment::{EnvironmentResolver, RunConfig, RunEnvironment};
pub use ledger::{EntryContent, EntryType, ResultEntry, ResultLedger};
pub use loader::{ConfigLoader, LoadError, ScheduleDefinition};
pub use report::{CaseDetails, CaseStatus, ReportError, SuiteSummary, TestCase, TestSuiteReport};
pub use run::{Run, RunId, RunKind, RunKindTag, RunMeta, RunStatus};
pub use server_config::{
    ChatConfig, ProvisionerConfig, ServerConfig, StoreConfig, TimeoutsConfig, VcsConfig,
};
