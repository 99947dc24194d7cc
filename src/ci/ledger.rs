//! Result ledger
//!
//! The append-only evidence trail of a run and the rule that turns it into
//! one verdict.

use serde::{Deserialize, Serialize};

use super::report::TestSuiteReport;
use super::run::RunStatus;

/// Kind of evidence an entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Log,
    Testsuite,
}

/// Payload of an entry: raw output for logs, a parsed report for suites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryContent {
    Log(String),
    TestSuite(TestSuiteReport),
}

impl EntryContent {
    pub fn as_log(&self) -> Option<&str> {
        match self {
            EntryContent::Log(text) => Some(text),
            EntryContent::TestSuite(_) => None,
        }
    }

    pub fn as_suite(&self) -> Option<&TestSuiteReport> {
        match self {
            EntryContent::TestSuite(report) => Some(report),
            EntryContent::Log(_) => None,
        }
    }
}

/// One unit of evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub status: RunStatus,
    pub name: String,
    pub content: EntryContent,
}

impl ResultEntry {
    pub fn log(name: impl Into<String>, status: RunStatus, content: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Log,
            status,
            name: name.into(),
            content: EntryContent::Log(content.into()),
        }
    }

    pub fn testsuite(name: impl Into<String>, status: RunStatus, report: TestSuiteReport) -> Self {
        Self {
            entry_type: EntryType::Testsuite,
            status,
            name: name.into(),
            content: EntryContent::TestSuite(report),
        }
    }

    /// The synthetic entry recorded when a run has no test steps
    pub fn no_tests() -> Self {
        Self::log("No tests", RunStatus::Success, "No tests found")
    }
}

/// Ordered, append-only list of result entries
///
/// There is deliberately no way to edit or remove an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLedger(Vec<ResultEntry>);

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ResultEntry) {
        self.0.push(entry);
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overall status: the status of the last non-success entry, or
    /// success when there is none.
    ///
    /// Last write wins. An `error` followed later by a `failure` yields
    /// `failure`; this is not a worst-of ordering.
    pub fn aggregate(&self) -> RunStatus {
        self.0
            .iter()
            .fold(RunStatus::Success, |status, entry| {
                if entry.status != RunStatus::Success {
                    entry.status
                } else {
                    status
                }
            })
    }
}

impl FromIterator<ResultEntry> for ResultLedger {
    fn from_iter<I: IntoIterator<Item = ResultEntry>>(iter: I) -> Self {
        ResultLedger(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ResultLedger {
    type Item = &'a ResultEntry;
    type IntoIter = std::slice::Iter<'a, ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
