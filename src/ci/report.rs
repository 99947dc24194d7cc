//! Structured test reports
//!
//! Parses JUnit XML written by a test step into the summary-plus-cases
//! shape stored on `testsuite` ledger entries. A `<testsuites>` document is
//! folded into a single suite.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed report: {0}")]
    Malformed(#[from] quick_xml::DeError),

    #[error("Report has no testsuite element")]
    Empty,

    #[error("Report time is not a finite number: {0}")]
    InvalidTime(f64),
}

/// Suite-level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub name: String,
    pub tests: u32,
    pub errors: u32,
    pub failures: u32,
    pub skip: u32,
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failure,
    Error,
    Skipped,
}

/// Message and body attached to a non-passing case
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub classname: String,
    pub time: f64,
    pub status: CaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<CaseDetails>,
}

/// Parsed structured report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteReport {
    pub summary: SuiteSummary,
    pub testcases: Vec<TestCase>,
}

impl TestSuiteReport {
    /// Read and parse a report file
    pub async fn load(path: &Path) -> Result<Self, ReportError> {
        let xml = tokio::fs::read_to_string(path).await?;
        Self::parse(&xml)
    }

    /// Parse a JUnit XML document
    pub fn parse(xml: &str) -> Result<Self, ReportError> {
        let report = Self::parse_document(xml)?;
        report.check_times()?;
        Ok(report)
    }

    fn parse_document(xml: &str) -> Result<Self, ReportError> {
        match root_element(xml)?.as_str() {
            "testsuites" => {
                let doc: RawSuites = quick_xml::de::from_str(xml)?;
                let mut suites = doc.suites.into_iter();
                let first = suites.next().ok_or(ReportError::Empty)?;
                Ok(suites.fold(first.into_report(), |mut report, suite| {
                    report.absorb(suite.into_report());
                    report
                }))
            }
            "testsuite" => {
                let suite: RawSuite = quick_xml::de::from_str(xml)?;
                Ok(suite.into_report())
            }
            _ => Err(ReportError::Empty),
        }
    }

    /// Stored runs are JSON, which has no NaN or infinity
    fn check_times(&self) -> Result<(), ReportError> {
        let mut times = std::iter::once(self.summary.time).chain(self.testcases.iter().map(|c| c.time));
        match times.find(|t| !t.is_finite()) {
            Some(bad) => Err(ReportError::InvalidTime(bad)),
            None => Ok(()),
        }
    }

    fn absorb(&mut self, other: TestSuiteReport) {
        self.summary.tests += other.summary.tests;
        self.summary.errors += other.summary.errors;
        self.summary.failures += other.summary.failures;
        self.summary.skip += other.summary.skip;
        self.summary.time += other.summary.time;
        self.testcases.extend(other.testcases);
    }
}

fn root_element(xml: &str) -> Result<String, ReportError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::Eof => return Err(ReportError::Empty),
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSuites {
    #[serde(rename = "testsuite", default)]
    suites: Vec<RawSuite>,
}

#[derive(Debug, Deserialize)]
struct RawSuite {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@tests", default)]
    tests: u32,
    #[serde(rename = "@errors", default)]
    errors: u32,
    #[serde(rename = "@failures", default)]
    failures: u32,
    #[serde(rename = "@skipped", alias = "@skips", default)]
    skipped: u32,
    #[serde(rename = "@time", default)]
    time: f64,
    #[serde(rename = "testcase", default)]
    cases: Vec<RawCase>,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@classname", default)]
    classname: String,
    #[serde(rename = "@time", default)]
    time: f64,
    #[serde(default)]
    failure: Option<RawIssue>,
    #[serde(default)]
    error: Option<RawIssue>,
    #[serde(default)]
    skipped: Option<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(rename = "@message", default)]
    message: Option<String>,
    #[serde(rename = "@type", default)]
    kind: Option<String>,
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

impl From<RawIssue> for CaseDetails {
    fn from(issue: RawIssue) -> Self {
        CaseDetails {
            message: issue.message,
            kind: issue.kind,
            content: issue.text.unwrap_or_default(),
        }
    }
}

impl RawSuite {
    fn into_report(self) -> TestSuiteReport {
        TestSuiteReport {
            summary: SuiteSummary {
                name: self.name,
                tests: self.tests,
                errors: self.errors,
                failures: self.failures,
                skip: self.skipped,
                time: self.time,
            },
            testcases: self.cases.into_iter().map(RawCase::into_case).collect(),
        }
    }
}

impl RawCase {
    fn into_case(self) -> TestCase {
        // error outranks failure outranks skipped when a runner emits several
        let (status, details) = if let Some(issue) = self.error {
            (CaseStatus::Error, Some(issue.into()))
        } else if let Some(issue) = self.failure {
            (CaseStatus::Failure, Some(issue.into()))
        } else if let Some(issue) = self.skipped {
            (CaseStatus::Skipped, Some(issue.into()))
        } else {
            (CaseStatus::Passed, None)
        };

        TestCase {
            name: self.name,
            classname: self.classname,
            time: self.time,
            status,
            details,
        }
    }
}
