//! Step execution results

use std::path::PathBuf;
use std::time::Duration;

/// Exit status reported for a step that was cancelled on timeout
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// What one shell step left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
    /// Structured report written by the step, if any
    pub report_path: Option<PathBuf>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// A step the backend could not run at all
    pub fn failed_to_run(message: impl Into<String>) -> Self {
        Self::new(-1, String::new(), message)
    }

    /// A step cancelled after `limit`, keeping any output captured so far
    pub fn timed_out(limit: Duration, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let mut stderr = stderr.into();
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("Timed out after {} seconds", limit.as_secs()));

        Self {
            exit_status: TIMEOUT_EXIT_STATUS,
            stdout: stdout.into(),
            stderr,
            report_path: None,
            timed_out: true,
            duration_ms: limit.as_millis() as u64,
        }
    }

    pub fn with_report(mut self, path: PathBuf) -> Self {
        self.report_path = Some(path);
        self
    }

    /// Whether the step passed (exit status 0, not cancelled)
    pub fn passed(&self) -> bool {
        self.exit_status == 0 && !self.timed_out
    }

    /// stdout followed by stderr
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let sep = if self.stdout.ends_with('\n') { "" } else { "\n" };
                format!("{}{}{}", self.stdout, sep, self.stderr)
            }
        }
    }
}
