#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use zeroci::bridge::{BridgeError, BroadcastBus, ChatMessage, ChatSender, CommitStatus, Provisioner, Target, VcsAdapter};
use zeroci::ci::{Prerequisites, RunConfig, RunEnvironment};
use zeroci::engine::{CiContext, CiSettings, Pipeline, StepOutcome};
use zeroci::store::{MemoryRunConfigStore, MemoryRunStore};

pub const DOMAIN: &str = "https://ci.example.com";

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_file(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).expect("Failed to write file");
    path
}

pub fn ci_file(install: &[&str], script: &[&str]) -> String {
    let list = |items: &[&str]| {
        items
            .iter()
            .map(|item| format!("  - \"{}\"\n", item))
            .collect::<String>()
    };
    format!(
        "prequisties:\n  image_name: ubuntu:18.04\ninstall:\n{}script:\n{}",
        list(install),
        list(script)
    )
}

pub fn junit_report(name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<testsuite name="{}" errors="0" failures="0" skipped="0" tests="1" time="0.1">
  <testcase classname="tests.test_app" name="test_ok" time="0.1"/>
</testsuite>"#,
        name
    )
}

/// Provisioner that records every call and answers steps from rules
///
/// A rule matches when its pattern is a substring of the command; the first
/// match wins and unmatched commands pass with "ok".
pub struct FakeProvisioner {
    deploys: bool,
    rules: Mutex<Vec<(String, StepOutcome)>>,
    pub commands: Mutex<Vec<String>>,
    pub envs: Mutex<Vec<RunEnvironment>>,
    pub provisions: Mutex<u32>,
    pub teardowns: Mutex<u32>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self {
            deploys: true,
            rules: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            envs: Mutex::new(Vec::new()),
            provisions: Mutex::new(0),
            teardowns: Mutex::new(0),
        }
    }

    /// A backend that never hands out a target
    pub fn out_of_capacity() -> Self {
        Self {
            deploys: false,
            ..Self::new()
        }
    }

    pub fn on(self, pattern: &str, outcome: StepOutcome) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), outcome));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn provision_count(&self) -> u32 {
        *self.provisions.lock().unwrap()
    }

    pub fn teardown_count(&self) -> u32 {
        *self.teardowns.lock().unwrap()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision(&self, _prerequisites: &Prerequisites) -> Result<Option<Target>, BridgeError> {
        let mut provisions = self.provisions.lock().unwrap();
        *provisions += 1;
        if !self.deploys {
            return Ok(None);
        }
        Ok(Some(Target::new(format!("fake-{}", provisions), std::env::temp_dir())))
    }

    async fn run(
        &self,
        _target: &Target,
        command: &str,
        env: &RunEnvironment,
        _timeout: Duration,
    ) -> Result<StepOutcome, BridgeError> {
        self.commands.lock().unwrap().push(command.to_string());
        self.envs.lock().unwrap().push(env.clone());

        let rules = self.rules.lock().unwrap();
        let outcome = rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| StepOutcome::new(0, "ok", ""));
        Ok(outcome)
    }

    async fn teardown(&self, _target: &Target) -> Result<(), BridgeError> {
        *self.teardowns.lock().unwrap() += 1;
        Ok(())
    }
}

/// VCS serving one CI file and recording posted statuses
#[derive(Default)]
pub struct FakeVcs {
    pub ci_file: Mutex<Option<String>>,
    pub branches: Vec<String>,
    pub fail_fetch: bool,
    pub fail_posts: bool,
    pub statuses: Mutex<Vec<(String, String, CommitStatus)>>,
}

impl FakeVcs {
    pub fn with_ci_file(content: impl Into<String>) -> Self {
        Self {
            ci_file: Mutex::new(Some(content.into())),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_posts: true,
            ..Default::default()
        }
    }

    /// Every file read fails at the transport level
    pub fn fetch_fails() -> Self {
        Self {
            fail_fetch: true,
            ..Default::default()
        }
    }

    pub fn statuses(&self) -> Vec<(String, String, CommitStatus)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.statuses()
            .into_iter()
            .map(|(_, _, status)| status.context)
            .collect()
    }
}

#[async_trait]
impl VcsAdapter for FakeVcs {
    async fn fetch_file(&self, _repo: &str, _git_ref: &str, _path: &str) -> Result<Option<String>, BridgeError> {
        if self.fail_fetch {
            return Err(BridgeError::HttpError {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(self.ci_file.lock().unwrap().clone())
    }

    async fn list_branches(&self, _repo: &str) -> Result<Vec<String>, BridgeError> {
        Ok(self.branches.clone())
    }

    async fn post_status(&self, repo: &str, commit: &str, status: &CommitStatus) -> Result<(), BridgeError> {
        if self.fail_posts {
            return Err(BridgeError::HttpError {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.statuses
            .lock()
            .unwrap()
            .push((repo.to_string(), commit.to_string(), status.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeChat {
    pub fail: bool,
    pub messages: Mutex<Vec<ChatMessage>>,
}

impl FakeChat {
    pub fn unreachable() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSender for FakeChat {
    async fn send(&self, message: &ChatMessage) -> Result<(), BridgeError> {
        if self.fail {
            return Err(BridgeError::Timeout);
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Every collaborator of a pipeline, kept for assertions
pub struct Harness {
    pub provisioner: Arc<FakeProvisioner>,
    pub vcs: Arc<FakeVcs>,
    pub chat: Arc<FakeChat>,
    pub store: Arc<MemoryRunStore>,
    pub run_configs: Arc<MemoryRunConfigStore>,
    pub bus: BroadcastBus,
}

impl Harness {
    pub fn new(provisioner: FakeProvisioner, vcs: FakeVcs) -> Self {
        Self::with_chat(provisioner, vcs, FakeChat::default())
    }

    pub fn with_chat(provisioner: FakeProvisioner, vcs: FakeVcs, chat: FakeChat) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            vcs: Arc::new(vcs),
            chat: Arc::new(chat),
            store: Arc::new(MemoryRunStore::new()),
            run_configs: Arc::new(MemoryRunConfigStore::new(Vec::new())),
            bus: BroadcastBus::default(),
        }
    }

    pub fn add_run_config(&self, name: &str, vars: &[(&str, &str)]) {
        self.run_configs.insert(RunConfig {
            name: name.to_string(),
            env: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_on(self.provisioner.clone(), CiSettings::default().vcs_host)
    }

    /// Pipeline driving a real provisioner, cloning from `vcs_host`
    pub fn pipeline_on(&self, provisioner: Arc<dyn Provisioner>, vcs_host: impl Into<String>) -> Pipeline {
        let settings = CiSettings {
            domain: DOMAIN.to_string(),
            vcs_host: vcs_host.into(),
            ..CiSettings::default()
        };
        let context = CiContext::new(
            provisioner,
            self.vcs.clone(),
            self.chat.clone(),
            self.store.clone(),
            self.run_configs.clone(),
            Arc::new(self.bus.clone()),
        )
        .with_settings(settings);
        Pipeline::new(context)
    }
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=zeroci", "-c", "user.email=ci@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Bare repository `{root}/{repo}.git` with one commit on `branch`
///
/// Returns the clone host (`file://{root}`) and the commit id.
pub fn bare_repo(root: &Path, repo: &str, branch: &str) -> (String, String) {
    let work = root.join("work");
    fs::create_dir_all(&work).unwrap();
    git(&work, &["init", "-q"]);
    git(&work, &["checkout", "-q", "-b", branch]);
    fs::write(work.join("README"), "zeroci fixture\n").unwrap();
    git(&work, &["add", "README"]);
    git(&work, &["commit", "-q", "-m", "init"]);
    let commit = git(&work, &["rev-parse", "HEAD"]);

    let bare = root.join(format!("{}.git", repo));
    fs::create_dir_all(bare.parent().unwrap()).unwrap();
    git(root, &["clone", "-q", "--bare", work.to_str().unwrap(), bare.to_str().unwrap()]);

    (format!("file://{}", root.display()), commit)
}
