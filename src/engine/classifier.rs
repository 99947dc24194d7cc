//! Result classifier
//!
//! Turns a step outcome into one ledger entry. The exit status alone
//! decides the entry's status; a structured report only decides its shape.
//! An unreadable report degrades the entry to a log and never fails the
//! run.

use std::path::Path;

use tracing::{debug, warn};

use super::result::StepOutcome;
use crate::ci::{ResultEntry, RunStatus, TestSuiteReport};

/// Name of the formatting-check entry
pub const STYLE_ENTRY_NAME: &str = "Black Formatting";

/// Marker the formatter prints for every file it would rewrite
const REFORMAT_MARKER: &str = "reformatted";

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultClassifier;

impl ResultClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a finished step labelled `label`
    pub async fn classify(&self, outcome: &StepOutcome, label: &str) -> ResultEntry {
        let status = exit_status(outcome);

        let Some(report_path) = &outcome.report_path else {
            return ResultEntry::log(label, status, outcome.combined_output());
        };

        let parsed = TestSuiteReport::load(report_path).await;
        discard_report(report_path).await;

        match parsed {
            Ok(report) => {
                let name = if report.summary.name.is_empty() {
                    label.to_string()
                } else {
                    report.summary.name.clone()
                };
                debug!(suite = %name, cases = report.testcases.len(), "Parsed structured report");
                ResultEntry::testsuite(name, status, report)
            }
            Err(e) => {
                warn!(step = label, error = %e, "Unreadable structured report, keeping step output");
                ResultEntry::log(label, status, outcome.combined_output())
            }
        }
    }

    /// Classify the formatting check
    ///
    /// The check fails on a non-zero exit or when the formatter reports it
    /// would reformat anything.
    pub fn style_entry(&self, outcome: &StepOutcome) -> ResultEntry {
        let output = outcome.combined_output();
        let status = if !outcome.passed() || output.contains(REFORMAT_MARKER) {
            RunStatus::Failure
        } else {
            RunStatus::Success
        };
        ResultEntry::log(STYLE_ENTRY_NAME, status, output)
    }
}

fn exit_status(outcome: &StepOutcome) -> RunStatus {
    if outcome.passed() {
        RunStatus::Success
    } else {
        RunStatus::Failure
    }
}

async fn discard_report(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(report = %path.display(), error = %e, "Couldn't delete report artifact");
        }
    }
}
