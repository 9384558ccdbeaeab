// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builds the final [`Report`] and replays a completed run through a
//! [`Reporter`] (spec.md §4.7, §6.3).

use super::events::{Reporter, RunEvent};
use crate::test_tree::{ExpectedStatus, Test};
use loomtest_metadata::{
    Annotation as ReportAnnotation, Report, ReportResult, ReportRunError, ReportSpec, ReportSuite, ReportTest,
    RunEndStatus,
};

/// Replays `tests` through `reporter` as a `RunBegin`/(`TestBegin`,
/// `TestEnd`)*/`RunEnd` sequence, in the order they were executed... in
/// this engine's batch model, in the order they appear in `tests`.
pub fn emit_events(tests: &[Test], status: RunEndStatus, reporter: &dyn Reporter) {
    reporter.on_event(&RunEvent::RunBegin { total: tests.len() });
    for test in tests {
        reporter.on_event(&RunEvent::TestBegin { test });
        reporter.on_event(&RunEvent::TestEnd { test });
    }
    reporter.on_event(&RunEvent::RunEnd { status });
}

/// Groups the flat `tests` list (one entry per (spec, project) pair) back
/// into the nested [`ReportSuite`] shape the JSON/JUnit reporters emit.
pub fn build_report(tests: &[Test], config: serde_json::Value, run_errors: Vec<ReportRunError>) -> Report {
    let mut by_suite_path: indexmap::IndexMap<(Vec<String>, String), Vec<&Test>> = indexmap::IndexMap::new();
    for test in tests {
        by_suite_path
            .entry((test.suite_path.clone(), test.spec_title.clone()))
            .or_default()
            .push(test);
    }

    let mut root_specs: indexmap::IndexMap<Vec<String>, Vec<ReportSpec>> = indexmap::IndexMap::new();
    for ((suite_path, title), group) in by_suite_path {
        let first = group[0];
        let spec = ReportSpec {
            title,
            file: first.file.clone(),
            line: first.line,
            column: first.column,
            tests: group
                .iter()
                .map(|test| ReportTest {
                    project_name: test.project.clone(),
                    expected_status: convert_expected(test.expected_status),
                    timeout: test.timeout,
                    annotations: test
                        .annotations
                        .iter()
                        .map(|a| ReportAnnotation {
                            kind: a.kind.clone(),
                            description: a.description.clone(),
                        })
                        .collect(),
                    results: test
                        .results
                        .iter()
                        .enumerate()
                        .map(|(attempt, result)| ReportResult {
                            worker_index: result.worker_index,
                            status: result.status,
                            duration: result.duration,
                            error: result.error.clone(),
                            stdout: result.stdout.clone(),
                            stderr: result.stderr.clone(),
                            attempt,
                            retry: attempt > 0,
                        })
                        .collect(),
                })
                .collect(),
        };
        root_specs.entry(suite_path).or_default().push(spec);
    }

    Report {
        config,
        suites: build_suite_tree(root_specs),
        errors: run_errors,
    }
}

fn convert_expected(status: ExpectedStatus) -> loomtest_metadata::ExpectedStatus {
    match status {
        ExpectedStatus::Passed => loomtest_metadata::ExpectedStatus::Passed,
        ExpectedStatus::Failed => loomtest_metadata::ExpectedStatus::Failed,
        ExpectedStatus::TimedOut => loomtest_metadata::ExpectedStatus::TimedOut,
        ExpectedStatus::Skipped => loomtest_metadata::ExpectedStatus::Skipped,
    }
}

/// Turns a flat map of suite-path to specs into the nested `ReportSuite`
/// tree, creating intermediate suites on demand.
fn build_suite_tree(root_specs: indexmap::IndexMap<Vec<String>, Vec<ReportSpec>>) -> Vec<ReportSuite> {
    fn find_or_insert<'a>(
        suites: &'a mut Vec<ReportSuite>,
        title: &str,
    ) -> &'a mut ReportSuite {
        if let Some(position) = suites.iter().position(|s| s.title == title) {
            &mut suites[position]
        } else {
            suites.push(ReportSuite {
                title: title.to_owned(),
                file: String::new().into(),
                specs: Vec::new(),
                suites: Vec::new(),
            });
            suites.last_mut().expect("just pushed")
        }
    }

    let mut roots = Vec::new();
    for (path, specs) in root_specs {
        if path.is_empty() {
            roots.extend(specs.into_iter().map(|spec| ReportSuite {
                title: String::new(),
                file: spec.file.clone(),
                specs: vec![spec],
                suites: Vec::new(),
            }));
            continue;
        }
        let mut node = find_or_insert(&mut roots, &path[0]);
        for title in &path[1..] {
            node = find_or_insert(&mut node.suites, title);
        }
        if let Some(first) = specs.first() {
            node.file = first.file.clone();
        }
        node.specs.extend(specs);
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_tree::{Project, RunConfig};

    #[test]
    fn build_report_groups_specs_under_their_suite_path() {
        let suite = crate::test_tree::Suite {
            title: "math".to_owned(),
            file: "tests/math.rs".into(),
            suites: vec![],
            specs: vec![crate::test_tree::Spec {
                title: "adds".to_owned(),
                file: "tests/math.rs".into(),
                line: 3,
                column: 1,
                only: false,
                annotations: vec![],
                fixture_refs: vec![],
                body: crate::loader::TestBody::noop(),
            }],
        };
        let registry = crate::fixture::FixtureRegistry::new();
        let tests = crate::test_tree::plan(&suite, &[Project::default()], &registry, &RunConfig::default()).unwrap();

        let report = build_report(&tests, serde_json::json!({}), vec![]);
        assert_eq!(report.suites.len(), 1);
        assert_eq!(report.suites[0].title, "math");
        assert_eq!(report.suites[0].specs[0].title, "adds");
        assert_eq!(report.suites[0].specs[0].tests.len(), 1);
    }
}
