// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test loader seam.
//!
//! Discovering test files and turning their declarations into a [`Suite`]
//! tree is explicitly out of scope (spec.md, Non-goals): a real loomtest
//! installation plugs in a loader that knows how to walk a crate's test
//! targets and collect `#[loomtest::test]`-annotated functions. What this
//! module owns is the *contract* such a loader must satisfy, plus a small
//! reference implementation for tests and examples, in the spirit of
//! `datatest-stable`'s `harness!(testfn, root, pattern)`: a fixed list of
//! (path, body) pairs handed to the runner directly, no filesystem
//! discovery involved.

use crate::errors::TreeBuildError;
use crate::fixture::{FixtureContext, FixtureResult};
use crate::test_tree::{Project, Suite};
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use std::sync::Arc;

/// The executable body of a test: takes the resolved test-scope fixture
/// context and runs to completion or error. Mirrors `fixture::SetupFn`'s
/// shape so the worker runtime can invoke both uniformly.
pub type TestFn = Arc<dyn Fn(FixtureContext) -> BoxFuture<'static, FixtureResult<()>> + Send + Sync>;

/// A loaded test body, opaque to everything except the worker runtime that
/// executes it.
#[derive(Clone)]
pub struct TestBody(pub TestFn);

impl TestBody {
    pub fn new<Fut>(f: impl Fn(FixtureContext) -> Fut + Send + Sync + 'static) -> Self
    where
        Fut: std::future::Future<Output = FixtureResult<()>> + Send + 'static,
    {
        TestBody(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// A body that always succeeds without touching its fixtures; used by
    /// tests that only care about tree-shape and filtering, not execution.
    pub fn noop() -> Self {
        TestBody::new(|_ctx| async { Ok(()) })
    }
}

impl std::fmt::Debug for TestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TestBody(..)")
    }
}

/// The result of a load pass: a suite tree plus any non-fatal errors
/// encountered while discovering individual files (spec.md §6.3,
/// `ReportRunError`).
pub struct LoadResult {
    pub root_suite: Suite,
    pub errors: Vec<LoadError>,
}

/// A non-fatal error tied to a specific file, surfaced in the final report
/// alongside passing/failing tests rather than aborting the run.
#[derive(Debug, Clone)]
pub struct LoadError {
    pub file: Option<Utf8PathBuf>,
    pub message: String,
}

/// Discovers and parses test declarations into a [`Suite`] tree.
///
/// Implementations are expected to be deterministic: the same set of input
/// paths must yield suites and specs in the same order every time, since
/// that order is the basis for `--shard` partitioning (spec.md §4.2).
pub trait Loader: Send + Sync {
    fn load_files(&self, paths: &[Utf8PathBuf], projects: &[Project]) -> Result<LoadResult, TreeBuildError>;
}

/// A loader that returns a fixed [`Suite`] tree handed to it at
/// construction time, ignoring `paths`/`projects` entirely. Useful for
/// tests, examples, and embedding loomtest in a host that already knows
/// its own test list (the `datatest-stable` `harness!` idiom).
pub struct StaticLoader {
    suite: Suite,
}

impl StaticLoader {
    pub fn new(suite: Suite) -> Self {
        Self { suite }
    }
}

impl Loader for StaticLoader {
    fn load_files(&self, _paths: &[Utf8PathBuf], _projects: &[Project]) -> Result<LoadResult, TreeBuildError> {
        Ok(LoadResult {
            root_suite: self.suite.clone(),
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_tree::Spec;

    #[test]
    fn static_loader_returns_fixed_suite_regardless_of_input() {
        let suite = Suite {
            title: "root".to_owned(),
            file: "tests/example.rs".into(),
            suites: vec![],
            specs: vec![Spec {
                title: "a".to_owned(),
                file: "tests/example.rs".into(),
                line: 1,
                column: 1,
                only: false,
                annotations: vec![],
                fixture_refs: vec![],
                body: TestBody::noop(),
            }],
        };
        let loader = StaticLoader::new(suite);
        let result = loader.load_files(&[], &[]).unwrap();
        assert_eq!(result.root_suite.specs.len(), 1);
        assert!(result.errors.is_empty());
    }
}
