//! CI pipeline
//!
//! One orchestration routine for every run kind. `RunKind` decides the
//! three places the kinds differ: where the CI config comes from, whether
//! the formatting check runs and whether commit statuses are posted.
//!
//! ```text
//! Pending -> Resolving -> Provisioning -> Installing -> [StyleCheck] -> Testing
//!         -> Aggregating -> Reporting -> Done
//! Resolving | Provisioning | Installing -> Error
//! ```
//!
//! A target is torn down exactly once when provisioning succeeded, whatever
//! happened afterwards, and never when provisioning failed.

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::classifier::ResultClassifier;
use super::context::CiContext;
use super::error::{PipelineError, RunFailure};
use super::executor::StepExecutor;
use super::notifier::NotificationDispatcher;
use super::stage::{PipelineStage, StageTracker};
use crate::bridge::Target;
use crate::ci::{
    is_comment, CiConfig, ConfigResolver, EnvironmentResolver, ResultEntry, Run, RunEnvironment,
    RunKind, RunMeta,
};

/// Where a run's CI config comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Fetch the CI file from the repository at the run's commit
    Repository,
    /// Use install and test steps handed in by the caller
    Supplied(CiConfig),
}

/// A request to create and drive one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    kind: RunKind,
    meta: RunMeta,
    source: ConfigSource,
}

impl RunRequest {
    /// A pushed commit; the CI file is read from the repository
    pub fn triggered(
        repo: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
        committer: impl Into<String>,
    ) -> Self {
        Self {
            kind: RunKind::Triggered {
                repo: repo.into(),
                branch: branch.into(),
                commit: commit.into(),
                committer: committer.into(),
            },
            meta: RunMeta::default(),
            source: ConfigSource::Repository,
        }
    }

    pub fn scheduled(schedule_name: impl Into<String>, config: CiConfig) -> Self {
        Self {
            kind: RunKind::Scheduled {
                schedule_name: schedule_name.into(),
            },
            meta: RunMeta::default(),
            source: ConfigSource::Supplied(config),
        }
    }

    pub fn project(name: impl Into<String>, config: CiConfig) -> Self {
        Self {
            kind: RunKind::Project { name: name.into() },
            meta: RunMeta::default(),
            source: ConfigSource::Supplied(config),
        }
    }

    pub fn triggered_by(mut self, actor: impl Into<String>) -> Self {
        self.meta.triggered_by = Some(actor.into());
        self
    }

    pub fn bin_release(mut self, release: impl Into<String>) -> Self {
        self.meta.bin_release = Some(release.into());
        self
    }

    pub fn kind(&self) -> &RunKind {
        &self.kind
    }
}

/// A finished run and the stages it went through
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run: Run,
    pub stages: Vec<PipelineStage>,
}

impl PipelineOutcome {
    pub fn ended_early(&self) -> bool {
        self.stages.contains(&PipelineStage::Error)
    }
}

#[derive(Clone)]
pub struct Pipeline {
    ctx: CiContext,
    executor: StepExecutor,
    classifier: ResultClassifier,
    notifier: NotificationDispatcher,
}

impl Pipeline {
    pub fn new(ctx: CiContext) -> Self {
        let executor = StepExecutor::new(ctx.provisioner.clone());
        let notifier = NotificationDispatcher::new(
            ctx.vcs.clone(),
            ctx.chat.clone(),
            ctx.bus.clone(),
            ctx.settings.domain.clone(),
            ctx.settings.status_context.clone(),
        );
        Self {
            ctx,
            executor,
            classifier: ResultClassifier::new(),
            notifier,
        }
    }

    pub fn context(&self) -> &CiContext {
        &self.ctx
    }

    /// Create a run for `request`, announce it and drive it to completion
    pub async fn submit(&self, request: RunRequest) -> Result<PipelineOutcome, PipelineError> {
        let RunRequest { kind, meta, source } = request;
        let run = self.ctx.store.create(kind, meta).await?;
        info!(run_id = %run.id, kind = ?run.kind.tag(), "Run created");

        self.notifier.publish_created(&run).await;
        self.execute(run, source).await
    }

    /// Drive independent runs concurrently
    pub async fn submit_all(
        &self,
        requests: Vec<RunRequest>,
    ) -> Vec<Result<PipelineOutcome, PipelineError>> {
        join_all(requests.into_iter().map(|request| self.submit(request))).await
    }

    /// Drive an already created run to its terminal status
    #[instrument(skip(self, run, source), fields(run_id = %run.id, kind = ?run.kind.tag()))]
    pub async fn execute(
        &self,
        run: Run,
        source: ConfigSource,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!("Run started");
        let mut tracker = StageTracker::new(run.id.clone());
        let mut target: Option<Target> = None;

        let driven = self.drive(&run, source, &mut tracker, &mut target).await;
        let finished = match driven {
            Ok(()) => self.finish(&run, &mut tracker).await,
            Err(e) => Err(e),
        };

        // After the verdict is stored, before anyone is told about it
        if let Some(target) = target.take() {
            self.teardown(&run, &target).await;
        }

        let run = finished?;
        if tracker.current() != PipelineStage::Error {
            tracker.enter(PipelineStage::Reporting);
        }
        self.notifier.dispatch(&run).await;
        if tracker.current() != PipelineStage::Error {
            tracker.enter(PipelineStage::Done);
        }

        info!(status = %run.status, entries = run.result.len(), "Run finished");
        Ok(PipelineOutcome {
            run,
            stages: tracker.into_stages(),
        })
    }

    async fn drive(
        &self,
        run: &Run,
        source: ConfigSource,
        tracker: &mut StageTracker,
        target: &mut Option<Target>,
    ) -> Result<(), PipelineError> {
        let config = match source {
            ConfigSource::Supplied(config) => config,
            ConfigSource::Repository => {
                tracker.enter(PipelineStage::Resolving);
                match self.resolve_config(run).await {
                    Ok(config) => config,
                    Err(failure) => return self.fail(run, tracker, failure).await,
                }
            }
        };

        tracker.enter(PipelineStage::Provisioning);
        let install = config.install_script();
        if install.is_empty() {
            return self.fail(run, tracker, RunFailure::ConfigAbsent).await;
        }

        let env = EnvironmentResolver::new(self.ctx.run_configs.clone())
            .resolve(run.kind.environment_key())
            .await;

        let acquired = match self.ctx.provisioner.provision(&config.prerequisites).await {
            Ok(Some(acquired)) => acquired,
            Ok(None) => return self.fail(run, tracker, RunFailure::ProvisionFailure).await,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Provisioning backend failed");
                return self.fail(run, tracker, RunFailure::ProvisionFailure).await;
            }
        };
        info!(run_id = %run.id, target_id = %acquired.id, "Target provisioned");
        let target: &Target = target.insert(acquired);

        tracker.enter(PipelineStage::Installing);
        let timeouts = self.ctx.settings.timeouts;
        let install_script = self.install_script(run, target, install);
        let installed = self
            .executor
            .execute(target, &install_script, &env, timeouts.install())
            .await;
        if !installed.passed() {
            let failure = RunFailure::InstallFailure {
                output: installed.combined_output(),
            };
            return self.fail(run, tracker, failure).await;
        }

        if run.kind.runs_style_check() {
            tracker.enter(PipelineStage::StyleCheck);
            self.style_check(run, target, &env).await?;
        }

        tracker.enter(PipelineStage::Testing);
        self.test(run, target, &env, &config.test_steps).await
    }

    async fn resolve_config(&self, run: &Run) -> Result<CiConfig, RunFailure> {
        let (Some(repo), Some(commit)) = (run.kind.repo(), run.kind.commit()) else {
            return Err(RunFailure::ConfigAbsent);
        };
        let resolver = ConfigResolver::new(self.ctx.vcs.clone(), &self.ctx.settings.config_file);
        match resolver.resolve(repo, commit).await {
            Ok(Some(config)) => Ok(config),
            Ok(None) => Err(RunFailure::ConfigAbsent),
            Err(e) => Err(e.into()),
        }
    }

    /// The install unit for this run on `target`
    fn install_script(&self, run: &Run, target: &Target, install: String) -> String {
        match &run.kind {
            RunKind::Triggered {
                repo,
                branch,
                commit,
                ..
            } => {
                let repos_dir = target.checkout_root(&self.ctx.settings.repos_dir);
                format!(
                    "{}{}",
                    checkout_prefix(&repos_dir, &self.ctx.settings.vcs_host, repo, branch, commit),
                    install
                )
            }
            _ => install,
        }
    }

    async fn style_check(
        &self,
        run: &Run,
        target: &Target,
        env: &RunEnvironment,
    ) -> Result<(), PipelineError> {
        let Some(repo) = run.kind.repo() else {
            return Ok(());
        };
        let command = style_command(&target.checkout_root(&self.ctx.settings.repos_dir), repo);
        let outcome = self
            .executor
            .execute(target, &command, env, self.ctx.settings.timeouts.style_check())
            .await;

        let entry = self.classifier.style_entry(&outcome);
        let status = entry.status;
        self.record(run, entry).await?;
        self.notifier.post_style_status(run, status).await;
        Ok(())
    }

    async fn test(
        &self,
        run: &Run,
        target: &Target,
        env: &RunEnvironment,
        steps: &[String],
    ) -> Result<(), PipelineError> {
        if steps.is_empty() {
            return self.record(run, ResultEntry::no_tests()).await;
        }

        for line in steps {
            if is_comment(line) {
                debug!(run_id = %run.id, line = %line, "Skipping commented test step");
                continue;
            }
            let outcome = self
                .executor
                .execute(target, line, env, self.ctx.settings.timeouts.test())
                .await;
            let entry = self.classifier.classify(&outcome, line).await;
            self.record(run, entry).await?;
        }
        Ok(())
    }

    async fn record(&self, run: &Run, entry: ResultEntry) -> Result<(), PipelineError> {
        debug!(run_id = %run.id, entry = %entry.name, status = %entry.status, "Recording result");
        self.ctx.store.append_result(&run.id, entry).await?;
        Ok(())
    }

    async fn fail(
        &self,
        run: &Run,
        tracker: &mut StageTracker,
        failure: RunFailure,
    ) -> Result<(), PipelineError> {
        warn!(run_id = %run.id, stage = ?tracker.current(), reason = %failure, "Run ended early");
        tracker.fail();
        self.record(run, failure.entry()).await
    }

    /// Recompute the verdict from the stored ledger and persist it
    async fn finish(&self, run: &Run, tracker: &mut StageTracker) -> Result<Run, PipelineError> {
        if tracker.current() != PipelineStage::Error {
            tracker.enter(PipelineStage::Aggregating);
        }
        let stored = self.ctx.store.get(&run.id).await?;
        let status = stored.result.aggregate();
        self.ctx.store.set_status(&run.id, status).await?;
        Ok(self.ctx.store.get(&run.id).await?)
    }

    async fn teardown(&self, run: &Run, target: &Target) {
        match self.ctx.provisioner.teardown(target).await {
            Ok(()) => info!(run_id = %run.id, target_id = %target.id, "Target torn down"),
            Err(e) => warn!(run_id = %run.id, target_id = %target.id, error = %e, "Teardown failed"),
        }
    }
}

/// Shell prefix that checks the run's commit out on the target
pub fn checkout_prefix(
    repos_dir: &str,
    vcs_host: &str,
    repo: &str,
    branch: &str,
    commit: &str,
) -> String {
    let org = repo.split('/').next().unwrap_or(repo);
    format!(
        "mkdir -p {dir}/{org} && cd {dir}/{org} && git clone {host}/{repo}.git --branch {branch} && cd {dir}/{repo} && git reset --hard {commit} && ",
        dir = repos_dir,
        org = org,
        host = vcs_host.trim_end_matches('/'),
        repo = repo,
        branch = branch,
        commit = commit,
    )
}

/// Formatting check over the checked-out tree
pub fn style_command(repos_dir: &str, repo: &str) -> String {
    format!(
        "black {}/{} -l 120 -t py37 --diff --exclude 'templates' 1>/dev/null",
        repos_dir, repo
    )
}
