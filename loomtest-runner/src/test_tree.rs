// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test tree (C2, spec.md §4.2) and the `RunConfig` it is planned
//! against.

use crate::errors::TreeBuildError;
use crate::fixture::{FixtureHash, FixtureRegistry};
use camino::Utf8PathBuf;
use loomtest_metadata::{AttemptStatus, TestError};
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A project: a named configuration applied to the spec set (spec.md §3).
#[derive(Clone, Debug)]
pub struct Project {
    pub name: String,
    pub output_dir: Utf8PathBuf,
    pub test_dir: Utf8PathBuf,
    pub test_match: Vec<String>,
    pub test_ignore: Vec<String>,
    pub timeout: Duration,
    pub retries: usize,
    pub repeat_each: usize,
    pub snapshot_dir: Utf8PathBuf,
    pub metadata: serde_json::Value,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            output_dir: "test-results".into(),
            test_dir: ".".into(),
            test_match: vec!["**/*.rs".to_owned()],
            test_ignore: vec![],
            timeout: Duration::from_secs(30),
            retries: 0,
            repeat_each: 1,
            snapshot_dir: "__snapshots__".into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// A suite declaration produced by the (out-of-scope) loader: a nested
/// container of child suites and specs.
#[derive(Clone, Debug, Default)]
pub struct Suite {
    pub title: String,
    pub file: Utf8PathBuf,
    pub suites: Vec<Suite>,
    pub specs: Vec<Spec>,
}

/// A registered test declaration, prior to per-project expansion.
#[derive(Clone, Debug)]
pub struct Spec {
    pub title: String,
    pub file: Utf8PathBuf,
    pub line: u32,
    pub column: u32,
    /// `test.only`-style marking; see spec.md §4.2 (`ForbiddenOnly`).
    pub only: bool,
    /// Annotations such as `skip`, `fixme`, `slow`.
    pub annotations: Vec<Annotation>,
    /// Names of fixtures the test body depends on directly (its transitive
    /// deps are resolved through the fixture registry).
    pub fixture_refs: Vec<String>,
    pub body: crate::loader::TestBody,
}

/// One annotation on a test (spec.md §3).
#[derive(Clone, Debug)]
pub struct Annotation {
    pub kind: String,
    pub description: Option<String>,
}

/// The outcome expected from a test's final attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpectedStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

/// Globally unique identifier for a planned [`Test`], stable for the
/// lifetime of a single run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TestId(pub u64);

static NEXT_TEST_ID: AtomicU64 = AtomicU64::new(0);

impl TestId {
    fn fresh() -> Self {
        TestId(NEXT_TEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A planning unit: one (spec, project) pair (spec.md §3).
#[derive(Clone, Debug)]
pub struct Test {
    pub id: TestId,
    pub spec_title: String,
    pub suite_path: Vec<String>,
    pub file: Utf8PathBuf,
    pub line: u32,
    pub column: u32,
    pub project: String,
    pub fixture_hash: FixtureHash,
    pub fixture_refs: Vec<String>,
    pub timeout: Duration,
    pub expected_status: ExpectedStatus,
    pub annotations: Vec<Annotation>,
    pub retries: usize,
    pub only: bool,
    pub results: Vec<TestResult>,
}

impl Test {
    /// The final status: the last attempt's status, or `flaky` if an
    /// earlier attempt failed before a later attempt passed (spec.md §3,
    /// §8).
    pub fn final_status(&self) -> Option<FinalStatus> {
        let last = self.results.last()?;
        Some(match last.status {
            AttemptStatus::Passed if self.results.len() > 1 => FinalStatus::Flaky,
            AttemptStatus::Passed => FinalStatus::Passed,
            AttemptStatus::Failed => FinalStatus::Failed,
            AttemptStatus::TimedOut => FinalStatus::TimedOut,
            AttemptStatus::Skipped => FinalStatus::Skipped,
        })
    }

    /// `suite titles concatenated + space + spec title`, per spec.md §4.2's
    /// definition of what `--grep` matches against.
    pub fn full_title(&self) -> String {
        let mut full = self.suite_path.join(" ");
        if !full.is_empty() {
            full.push(' ');
        }
        full.push_str(&self.spec_title);
        full
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FinalStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
    Flaky,
}

/// One execution attempt of a [`Test`] (spec.md §3).
#[derive(Clone, Debug)]
pub struct TestResult {
    pub attempt: usize,
    pub worker_index: usize,
    pub start_time: chrono::DateTime<chrono::Local>,
    pub duration: Duration,
    pub status: AttemptStatus,
    pub error: Option<TestError>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub attachments: Vec<Utf8PathBuf>,
}

/// A shard selector (`--shard=c/t`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shard {
    pub current: usize,
    pub total: usize,
}

/// The run's configuration (spec.md §3).
#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    pub workers: usize,
    pub forbid_only: bool,
    pub grep: Option<Regex>,
    pub project_filter: Option<Vec<String>>,
    pub max_failures: Option<usize>,
    pub global_timeout: Option<Duration>,
    pub update_snapshots: bool,
    pub shard: Option<Shard>,
}

/// Builds the flattened, filtered list of runnable [`Test`]s from a loaded
/// `Suite` tree and the configured projects, in stable iteration order
/// (spec.md §4.2): file discovery order, then declaration order within a
/// file, then project order.
pub fn plan(
    root: &Suite,
    projects: &[Project],
    registry: &FixtureRegistry,
    config: &RunConfig,
) -> Result<Vec<Test>, TreeBuildError> {
    if config.forbid_only && any_only(root) {
        return Err(TreeBuildError::ForbiddenOnly);
    }

    let mut tests = Vec::new();
    collect(root, &[], projects, registry, &mut tests)?;

    let has_only = tests.iter().any(|t| t.only);
    if has_only {
        tests.retain(|t| t.only);
    }

    if let Some(grep) = &config.grep {
        tests.retain(|t| grep.is_match(&t.full_title()));
    }
    if let Some(allowed) = &config.project_filter {
        tests.retain(|t| allowed.iter().any(|name| name == &t.project));
    }
    if let Some(shard) = config.shard {
        tests = tests
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % shard.total == shard.current - 1)
            .map(|(_, t)| t)
            .collect();
    }

    Ok(tests)
}

fn any_only(suite: &Suite) -> bool {
    suite.specs.iter().any(|s| s.only) || suite.suites.iter().any(any_only)
}

fn collect(
    suite: &Suite,
    suite_path: &[String],
    projects: &[Project],
    registry: &FixtureRegistry,
    out: &mut Vec<Test>,
) -> Result<(), TreeBuildError> {
    let mut path = suite_path.to_vec();
    if !suite.title.is_empty() {
        path.push(suite.title.clone());
    }

    for spec in &suite.specs {
        for project in projects {
            let fixture_hash = registry.worker_hash(&spec.fixture_refs)?;
            let expected_status = if spec.annotations.iter().any(|a| a.kind == "skip" || a.kind == "fixme")
            {
                ExpectedStatus::Skipped
            } else {
                ExpectedStatus::Passed
            };
            let timeout = if spec.annotations.iter().any(|a| a.kind == "slow") {
                project.timeout * 3
            } else {
                project.timeout
            };
            out.push(Test {
                id: TestId::fresh(),
                spec_title: spec.title.clone(),
                suite_path: path.clone(),
                file: spec.file.clone(),
                line: spec.line,
                column: spec.column,
                project: project.name.clone(),
                fixture_hash,
                fixture_refs: spec.fixture_refs.clone(),
                timeout,
                expected_status,
                annotations: spec.annotations.clone(),
                retries: project.retries,
                only: spec.only,
                results: Vec::new(),
            });
        }
    }

    for child in &suite.suites {
        collect(child, &path, projects, registry, out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureDef, Scope};
    use crate::loader::TestBody;
    use std::sync::Arc;

    fn spec(title: &str, only: bool) -> Spec {
        Spec {
            title: title.to_owned(),
            file: "tests/example.rs".into(),
            line: 1,
            column: 1,
            only,
            annotations: vec![],
            fixture_refs: vec![],
            body: TestBody::noop(),
        }
    }

    fn single_project_tree() -> (Suite, Vec<Project>, FixtureRegistry) {
        let suite = Suite {
            title: "math".to_owned(),
            file: "tests/example.rs".into(),
            suites: vec![],
            specs: vec![spec("adds", false), spec("subtracts", false)],
        };
        (suite, vec![Project::default()], FixtureRegistry::new())
    }

    #[test]
    fn plan_expands_one_test_per_project() {
        let (suite, _projects, registry) = single_project_tree();
        let projects = vec![Project::default(), {
            let mut p = Project::default();
            p.name = "second".to_owned();
            p
        }];
        let tests = plan(&suite, &projects, &registry, &RunConfig::default()).unwrap();
        assert_eq!(tests.len(), 4);
    }

    #[test]
    fn forbid_only_rejects_when_any_only_present() {
        let suite = Suite {
            title: "s".to_owned(),
            file: "tests/example.rs".into(),
            suites: vec![],
            specs: vec![spec("a", true)],
        };
        let config = RunConfig {
            forbid_only: true,
            ..Default::default()
        };
        let err = plan(&suite, &[Project::default()], &FixtureRegistry::new(), &config).unwrap_err();
        assert!(matches!(err, TreeBuildError::ForbiddenOnly));
    }

    #[test]
    fn only_filters_out_non_only_tests_when_not_forbidden() {
        let suite = Suite {
            title: "s".to_owned(),
            file: "tests/example.rs".into(),
            suites: vec![],
            specs: vec![spec("a", true), spec("b", false)],
        };
        let tests = plan(
            &suite,
            &[Project::default()],
            &FixtureRegistry::new(),
            &RunConfig::default(),
        )
        .unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].spec_title, "a");
    }

    #[test]
    fn grep_matches_against_full_title() {
        let (suite, _p, registry) = single_project_tree();
        let config = RunConfig {
            grep: Some(Regex::new("math adds").unwrap()),
            ..Default::default()
        };
        let tests = plan(&suite, &[Project::default()], &registry, &config).unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].spec_title, "adds");
    }

    #[test]
    fn shard_selects_every_nth_test_after_other_filters() {
        let mut specs = Vec::new();
        for i in 0..6 {
            specs.push(spec(&format!("t{i}"), false));
        }
        let suite = Suite {
            title: "s".to_owned(),
            file: "tests/example.rs".into(),
            suites: vec![],
            specs,
        };
        let config = RunConfig {
            shard: Some(Shard { current: 1, total: 2 }),
            ..Default::default()
        };
        let tests = plan(&suite, &[Project::default()], &FixtureRegistry::new(), &config).unwrap();
        let titles: Vec<_> = tests.iter().map(|t| t.spec_title.clone()).collect();
        assert_eq!(titles, vec!["t0", "t2", "t4"]);
    }

    #[test]
    fn fixture_hash_differs_by_required_worker_fixtures() {
        let mut registry = FixtureRegistry::new();
        registry
            .register(FixtureDef::new::<u8, _>("db", Scope::Worker, vec![], |_| async {
                Ok(0u8)
            }))
            .unwrap();
        let mut with_db = spec("uses-db", false);
        with_db.fixture_refs = vec!["db".to_owned()];
        let suite = Suite {
            title: "s".to_owned(),
            file: "tests/example.rs".into(),
            suites: vec![],
            specs: vec![spec("plain", false), with_db],
        };
        let tests = plan(&suite, &[Project::default()], &registry, &RunConfig::default()).unwrap();
        assert_ne!(tests[0].fixture_hash, tests[1].fixture_hash);
    }

    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn _assertions() {
        assert_send::<Arc<()>>();
    }
}
