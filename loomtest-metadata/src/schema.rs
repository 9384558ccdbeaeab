//! The JSON report schema (spec §6.3).
//!
//! These types are the wire format only: the engine (`loomtest-runner`)
//! keeps its own richer in-memory tree and converts into these at report
//! time. Fields are plain structs (not maps) so that `serde_json` preserves
//! declaration order, which golden-file diffing depends on.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-attempt status of a single test execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

/// The status a test was expected to produce, per spec.md's `Test` data
/// model (`expectedStatus`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpectedStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

/// The final, rolled-up status of a run (`onEnd` in the reporter interface).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunEndStatus {
    Passed,
    Failed,
    Interrupted,
    Timedout,
}

/// An error surfaced either from a test/fixture body (`{message, stack}`) or
/// a value thrown that wasn't an `Error` (`{value}`) — spec.md §7.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestError {
    Message {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    Value {
        value: serde_json::Value,
    },
}

impl TestError {
    pub fn from_message(message: impl Into<String>) -> Self {
        TestError::Message {
            message: message.into(),
            stack: None,
        }
    }
}

/// One annotation on a test (`test.skip`, `test.fixme`, `test.slow`, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single execution attempt of a test (spec.md `TestResult`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResult {
    pub worker_index: usize,
    pub status: AttemptStatus,
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub attempt: usize,
    pub retry: bool,
}

/// A test as it appears in the JSON report (one per project).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTest {
    pub project_name: String,
    pub expected_status: ExpectedStatus,
    pub timeout: Duration,
    pub annotations: Vec<Annotation>,
    pub results: Vec<ReportResult>,
}

/// A spec: one test declaration, expanded into one `ReportTest` per project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportSpec {
    pub title: String,
    pub file: Utf8PathBuf,
    pub line: u32,
    pub column: u32,
    pub tests: Vec<ReportTest>,
}

/// A suite: a nested container of specs and child suites.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportSuite {
    pub title: String,
    pub file: Utf8PathBuf,
    pub specs: Vec<ReportSpec>,
    pub suites: Vec<ReportSuite>,
}

/// A run-level error, not attributable to a single test (e.g. `LoaderError`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportRunError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Utf8PathBuf>,
}

/// The full JSON report (spec.md §6.3's root object).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub config: serde_json::Value,
    pub suites: Vec<ReportSuite>,
    pub errors: Vec<ReportRunError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn report_round_trips_through_json() {
        let report = Report {
            config: serde_json::json!({"workers": 4}),
            suites: vec![ReportSuite {
                title: "math".to_owned(),
                file: "tests/math.rs".into(),
                specs: vec![ReportSpec {
                    title: "adds".to_owned(),
                    file: "tests/math.rs".into(),
                    line: 10,
                    column: 1,
                    tests: vec![ReportTest {
                        project_name: "default".to_owned(),
                        expected_status: ExpectedStatus::Passed,
                        timeout: Duration::from_secs(30),
                        annotations: vec![],
                        results: vec![ReportResult {
                            worker_index: 0,
                            status: AttemptStatus::Passed,
                            duration: Duration::from_millis(12),
                            error: None,
                            stdout: vec![],
                            stderr: vec![],
                            attempt: 0,
                            retry: false,
                        }],
                    }],
                }],
                suites: vec![],
            }],
            errors: vec![],
        };

        let json = serde_json::to_string(&report).expect("serializes");
        let round_tripped: Report = serde_json::from_str(&json).expect("deserializes");
        let json2 = serde_json::to_string(&round_tripped).expect("serializes again");
        assert_eq!(json, json2, "report is isomorphic across a JSON round-trip");
    }

    #[test]
    fn test_error_untagged_variants_parse() {
        let message: TestError = serde_json::from_str(r#"{"message":"boom","stack":"at x"}"#)
            .expect("message variant parses");
        assert!(matches!(message, TestError::Message { .. }));

        let value: TestError =
            serde_json::from_str(r#"{"value":42}"#).expect("value variant parses");
        assert!(matches!(value, TestError::Value { .. }));
    }
}
