//! Step executor
//!
//! Thin wrapper over the provisioning backend. It never fails: a backend
//! that cannot run a step yields a failing outcome, and a backend that
//! overruns the step bound is cut off here even if it ignores the timeout
//! it was handed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::result::StepOutcome;
use crate::bridge::{Provisioner, Target};
use crate::ci::RunEnvironment;

/// Extra time a backend gets past the step bound before it is cancelled
const BACKEND_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct StepExecutor {
    provisioner: Arc<dyn Provisioner>,
    grace: Duration,
}

impl StepExecutor {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            grace: BACKEND_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `command` on `target`, blocking until it finishes or `timeout`
    /// elapses. Callers filter out comment lines before calling this.
    pub async fn execute(
        &self,
        target: &Target,
        command: &str,
        env: &RunEnvironment,
        timeout: Duration,
    ) -> StepOutcome {
        let start = Instant::now();
        let run = self.provisioner.run(target, command, env, timeout);

        let mut outcome = match tokio::time::timeout(timeout + self.grace, run).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(target_id = %target.id, error = %e, "Backend couldn't run step");
                StepOutcome::failed_to_run(e.to_string())
            }
            Err(_) => {
                warn!(target_id = %target.id, "Backend overran step timeout, cancelled");
                StepOutcome::timed_out(timeout, String::new(), String::new())
            }
        };

        if outcome.duration_ms == 0 {
            outcome.duration_ms = start.elapsed().as_millis() as u64;
        }
        debug!(
            target_id = %target.id,
            exit_status = outcome.exit_status,
            duration_ms = outcome.duration_ms,
            "Step finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeError;
    use crate::ci::Prerequisites;
    use crate::engine::result::TIMEOUT_EXIT_STATUS;
    use async_trait::async_trait;
    use std::path::PathBuf;

    enum Behaviour {
        Exit(i32),
        Fail,
        Hang,
    }

    struct ScriptedBackend(Behaviour);

    #[async_trait]
    impl Provisioner for ScriptedBackend {
        async fn provision(&self, _: &Prerequisites) -> Result<Option<Target>, BridgeError> {
            Ok(None)
        }

        async fn run(
            &self,
            _: &Target,
            command: &str,
            _: &RunEnvironment,
            _: Duration,
        ) -> Result<StepOutcome, BridgeError> {
            match self.0 {
                Behaviour::Exit(code) => Ok(StepOutcome::new(code, command, "")),
                Behaviour::Fail => Err(BridgeError::ConfigError("no route to target".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(StepOutcome::new(0, "", ""))
                }
            }
        }

        async fn teardown(&self, _: &Target) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    fn target() -> Target {
        Target::new("t-1", PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn test_execute_passes_outcome_through() {
        let executor = StepExecutor::new(Arc::new(ScriptedBackend(Behaviour::Exit(2))));
        let outcome = executor
            .execute(&target(), "pytest", &RunEnvironment::new(), Duration::from_secs(5))
            .await;
        assert_eq!(outcome.exit_status, 2);
        assert_eq!(outcome.stdout, "pytest");
    }

    #[tokio::test]
    async fn test_backend_error_is_failing_outcome() {
        let executor = StepExecutor::new(Arc::new(ScriptedBackend(Behaviour::Fail)));
        let outcome = executor
            .execute(&target(), "pytest", &RunEnvironment::new(), Duration::from_secs(5))
            .await;
        assert!(!outcome.passed());
        assert_eq!(outcome.exit_status, -1);
        assert!(outcome.stderr.contains("no route to target"));
    }

    #[tokio::test]
    async fn test_hanging_backend_is_cancelled() {
        let executor = StepExecutor::new(Arc::new(ScriptedBackend(Behaviour::Hang)))
            .with_grace(Duration::from_millis(10));
        let outcome = executor
            .execute(&target(), "sleep", &RunEnvironment::new(), Duration::from_millis(50))
            .await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_status, TIMEOUT_EXIT_STATUS);
    }
}
