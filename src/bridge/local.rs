//! Local provisioner
//!
//! Targets are fresh work directories on this host. Each one carries its
//! own checkout root (`repos/` inside the target), so runs of the same
//! repository never share a clone and teardown removes it. Steps run
//! through `sh -c` in their own process group inside the target directory
//! with the run environment exported, plus `ZEROCI_REPORT_PATH` pointing at
//! the file a step may write its JUnit report to.
//!
//! Example CI step using the report location:
//! ```yaml
//! script:
//!   - pytest tests --junitxml=$ZEROCI_REPORT_PATH
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BridgeError, Provisioner, Target};
use crate::ci::{Prerequisites, ProvisionerConfig, RunEnvironment};
use crate::engine::result::{StepOutcome, TIMEOUT_EXIT_STATUS};

/// Environment variable naming the report file for the current step
pub const REPORT_PATH_ENV: &str = "ZEROCI_REPORT_PATH";

/// Checkout root inside each target, removed with it on teardown
const CHECKOUT_DIR: &str = "repos";

/// How long to keep reading output after a timed-out step was killed
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    work_root: PathBuf,
    report_file: String,
}

impl LocalProvisioner {
    pub fn new(work_root: impl Into<PathBuf>, report_file: impl Into<String>) -> Self {
        Self {
            work_root: work_root.into(),
            report_file: report_file.into(),
        }
    }

    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self::new(config.work_root.clone(), config.report_file.clone())
    }

    fn report_location(&self, target: &Target) -> PathBuf {
        target.workdir.join(&self.report_file)
    }

    /// Move a report the step wrote out of the way so the next step starts clean
    async fn collect_report(&self, report: &Path, target: &Target) -> Option<PathBuf> {
        if !tokio::fs::try_exists(report).await.unwrap_or(false) {
            return None;
        }
        let kept = target
            .workdir
            .join(format!(".report-{}.xml", uuid::Uuid::new_v4()));
        match tokio::fs::rename(report, &kept).await {
            Ok(()) => Some(kept),
            Err(e) => {
                warn!(report = %report.display(), error = %e, "Couldn't collect step report");
                None
            }
        }
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(&chunk[..n]),
        }
    }
}

fn spawn_capture<R>(reader: Option<R>, buf: &Arc<Mutex<Vec<u8>>>) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|r| tokio::spawn(capture(r, buf.clone())))
}

fn captured(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&buf.lock().unwrap_or_else(|e| e.into_inner())).into_owned()
}

/// Kill the step's process group, then the shell itself
async fn kill_step(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: plain signal delivery to the group created for this step
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if rc != 0 {
            let e = std::io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::ESRCH) {
                warn!(pid, error = %e, "Couldn't kill step process group");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        warn!(error = %e, "Couldn't kill timed-out step");
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision(&self, prerequisites: &Prerequisites) -> Result<Option<Target>, BridgeError> {
        if let Some(image) = prerequisites.image_name() {
            debug!(image, "Local targets run on the host, image request ignored");
        }

        let id = uuid::Uuid::new_v4().to_string();
        let workdir = self.work_root.join(&id);
        let repos_dir = workdir.join(CHECKOUT_DIR);
        tokio::fs::create_dir_all(&repos_dir).await?;
        info!(target_id = %id, workdir = %workdir.display(), "Provisioned local target");

        Ok(Some(Target::new(id, workdir).with_repos_dir(repos_dir)))
    }

    async fn run(
        &self,
        target: &Target,
        command: &str,
        env: &RunEnvironment,
        timeout: Duration,
    ) -> Result<StepOutcome, BridgeError> {
        let report = self.report_location(target);
        if let Err(e) = tokio::fs::remove_file(&report).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(report = %report.display(), error = %e, "Couldn't remove stale report");
            }
        }

        debug!(target_id = %target.id, command, "Executing step");
        let start = Instant::now();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&target.workdir)
            .envs(env.iter())
            .env(REPORT_PATH_ENV, &report)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the step started
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            spawn_capture(child.stdout.take(), &stdout_buf),
            spawn_capture(child.stderr.take(), &stderr_buf),
        ];

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let (exit_status, timed_out) = match waited {
            Ok(status) => (status?.code().unwrap_or(-1), false),
            Err(_) => {
                warn!(target_id = %target.id, command, "Step timed out after {:?}, killing", timeout);
                kill_step(&mut child, pid).await;
                (TIMEOUT_EXIT_STATUS, true)
            }
        };

        // Children that left the group may keep the pipes open after a kill
        for mut reader in readers.into_iter().flatten() {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let (stdout, stderr) = (captured(&stdout_buf), captured(&stderr_buf));

        if timed_out {
            let _ = tokio::fs::remove_file(&report).await;
            return Ok(StepOutcome::timed_out(timeout, stdout, stderr));
        }

        let mut outcome = StepOutcome::new(exit_status, stdout, stderr);
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        if let Some(path) = self.collect_report(&report, target).await {
            outcome = outcome.with_report(path);
        }
        Ok(outcome)
    }

    async fn teardown(&self, target: &Target) -> Result<(), BridgeError> {
        match tokio::fs::remove_dir_all(&target.workdir).await {
            Ok(()) => {
                info!(target_id = %target.id, "Destroyed local target");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn target(provisioner: &LocalProvisioner) -> Target {
        provisioner
            .provision(&Prerequisites::default())
            .await
            .unwrap()
            .expect("local provisioner always hands out a target")
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_status() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let target = target(&provisioner).await;

        let outcome = provisioner
            .run(&target, "echo hello; echo oops >&2; exit 3", &RunEnvironment::new(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.exit_status, 3);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.stderr.trim(), "oops");
        assert!(outcome.report_path.is_none());
    }

    #[tokio::test]
    async fn test_run_exports_environment_and_keeps_state_between_steps() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let target = target(&provisioner).await;

        let mut env = RunEnvironment::new();
        env.insert("GREETING".to_string(), "hi".to_string());

        provisioner
            .run(&target, "echo $GREETING > greeting.txt", &env, Duration::from_secs(10))
            .await
            .unwrap();
        let outcome = provisioner
            .run(&target, "cat greeting.txt", &RunEnvironment::new(), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(outcome.passed());
        assert_eq!(outcome.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn test_run_collects_report() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let target = target(&provisioner).await;

        let outcome = provisioner
            .run(
                &target,
                "echo '<testsuite name=\"x\"/>' > \"$ZEROCI_REPORT_PATH\"",
                &RunEnvironment::new(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let report = outcome.report_path.expect("report collected");
        assert!(report.exists());
        assert!(!target.workdir.join("test.xml").exists());
    }

    #[tokio::test]
    async fn test_run_timeout_keeps_partial_output() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let target = target(&provisioner).await;

        let outcome = provisioner
            .run(&target, "echo started; sleep 30", &RunEnvironment::new(), Duration::from_millis(300))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(!outcome.passed());
        assert_eq!(outcome.exit_status, TIMEOUT_EXIT_STATUS);
        assert!(outcome.stdout.contains("started"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_run_timeout_kills_step_children() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let target = target(&provisioner).await;

        let outcome = provisioner
            .run(
                &target,
                "sleep 37 & echo $! > child.pid; wait",
                &RunEnvironment::new(),
                Duration::from_millis(300),
            )
            .await
            .unwrap();
        assert!(outcome.timed_out);

        let pid = std::fs::read_to_string(target.workdir.join("child.pid")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Gone, or a zombie waiting for a reaper
        match std::fs::read_to_string(format!("/proc/{}/stat", pid.trim())) {
            Err(_) => {}
            Ok(stat) => {
                let state = stat.rsplit(')').next().unwrap().trim_start().chars().next();
                assert_eq!(state, Some('Z'), "child still running: {}", stat);
            }
        }
    }

    #[tokio::test]
    async fn test_provision_scopes_checkouts_to_target() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let first = target(&provisioner).await;
        let second = target(&provisioner).await;

        let repos_dir = first.repos_dir.clone().expect("local targets own a checkout root");
        assert!(repos_dir.starts_with(&first.workdir));
        assert!(repos_dir.is_dir());
        assert_ne!(first.checkout_root("/opt/code/vcs_repos"), second.checkout_root("/opt/code/vcs_repos"));

        provisioner.teardown(&first).await.unwrap();
        assert!(!repos_dir.exists());
    }

    #[tokio::test]
    async fn test_teardown_removes_workdir() {
        let root = tempdir().unwrap();
        let provisioner = LocalProvisioner::new(root.path(), "test.xml");
        let target = target(&provisioner).await;
        assert!(target.workdir.exists());

        provisioner.teardown(&target).await.unwrap();
        assert!(!target.workdir.exists());
        // A second teardown of a gone target is harmless
        provisioner.teardown(&target).await.unwrap();
    }
}
