// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `junit` reporter, using the `quick-junit` crate (spec.md §4.7).

use super::events::{Reporter, RunEvent};
use crate::test_tree::{FinalStatus, Test};
use quick_junit::{NonSuccessKind, Report as JunitReport, TestCase, TestCaseStatus, TestSuite};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;

pub struct JunitReporter {
    out: Mutex<Box<dyn Write + Send>>,
    tests: Mutex<Vec<Test>>,
}

impl JunitReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            tests: Mutex::new(Vec::new()),
        }
    }
}

impl Reporter for JunitReporter {
    fn on_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::TestEnd { test } => {
                self.tests.lock().expect("reporter mutex poisoned").push((*test).clone());
            }
            RunEvent::RunEnd { .. } => {
                let tests = self.tests.lock().expect("reporter mutex poisoned");
                let report = build_junit_report(&tests);
                let mut out = self.out.lock().expect("reporter mutex poisoned");
                match report.serialize(&mut *out) {
                    Ok(()) => {}
                    Err(error) => tracing::error!(%error, "failed to write JUnit XML"),
                }
            }
            _ => {}
        }
    }
}

fn build_junit_report(tests: &[Test]) -> JunitReport {
    let mut by_project: BTreeMap<String, Vec<&Test>> = BTreeMap::new();
    for test in tests {
        by_project.entry(test.project.clone()).or_default().push(test);
    }

    let mut report = JunitReport::new("loomtest");
    let mut test_suites = Vec::new();
    for (project, project_tests) in by_project {
        let mut suite = TestSuite::new(project);
        for test in project_tests {
            let classname = test.suite_path.join("::");
            let mut testcase = TestCase::new(test.spec_title.clone(), test_case_status(test));
            testcase.set_classname(classname);
            if let Some(result) = test.results.last() {
                testcase.set_time(result.duration);
            }
            suite.add_test_case(testcase);
        }
        test_suites.push(suite);
    }
    report.add_test_suites(test_suites);
    report
}

fn test_case_status(test: &Test) -> TestCaseStatus {
    match test.final_status() {
        Some(FinalStatus::Passed) | Some(FinalStatus::Flaky) => TestCaseStatus::success(),
        Some(FinalStatus::Skipped) | None => TestCaseStatus::skipped(),
        Some(FinalStatus::Failed) => {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
            let message = test
                .results
                .last()
                .and_then(|r| r.error.as_ref())
                .map(describe_error)
                .unwrap_or_else(|| "test failed".to_owned());
            status.set_message(message);
            status
        }
        Some(FinalStatus::TimedOut) => {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
            status.set_message("test timed out");
            status
        }
    }
}

fn describe_error(error: &loomtest_metadata::TestError) -> String {
    match error {
        loomtest_metadata::TestError::Message { message, .. } => message.clone(),
        loomtest_metadata::TestError::Value { value } => value.to_string(),
    }
}
