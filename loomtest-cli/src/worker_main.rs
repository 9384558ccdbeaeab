// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `__loomtest-worker` hidden subcommand: this binary re-exec'd as a
//! worker process, speaking the framed IPC protocol over its inherited
//! stdin/stdout (mirrors the `__double-spawn` re-exec pattern in
//! `nextest-runner::double_spawn`, minus the argv0 rewrite — the
//! dispatcher always knows to pass `__loomtest-worker` explicitly).

use crate::cli::WorkerOpts;
use crate::dispatch::PROJECT_COUNT_ENV;
use loomtest_runner::worker::{self, WorkerContext};

pub async fn run(opts: WorkerOpts) -> std::io::Result<()> {
    let (registry, suite) = crate::harness::build();
    let bodies_by_identity = crate::harness::index_bodies(&suite);

    // Re-derive the same `TestId -> TestBody` mapping the dispatching
    // process built, by planning the identical suite against an
    // unfiltered config with the same *number* of projects the dispatcher
    // resolved (see `dispatch::run`): `TestId`s are handed out one per
    // `(spec, project)` pair in nested order, so matching the project count
    // is what keeps the two processes' id sequences in lockstep. The
    // mapping itself only depends on `(suite_path, spec_title)`, which
    // `index_bodies` already keys on and which is the same regardless of
    // which project a given `Test` belongs to.
    let project_count: usize = std::env::var(PROJECT_COUNT_ENV)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1);
    let projects = vec![loomtest_runner::Project::default(); project_count];

    let mut test_bodies = std::collections::HashMap::new();
    let all_tests = loomtest_runner::test_tree::plan(
        &suite,
        &projects,
        &registry,
        &loomtest_runner::RunConfig::default(),
    )
    .unwrap_or_default();
    for test in &all_tests {
        if let Some(body) = bodies_by_identity.get(&(test.suite_path.clone(), test.spec_title.clone())) {
            test_bodies.insert(test.id.0, body.clone());
        }
    }

    let ctx = WorkerContext {
        worker_index: opts.worker_index,
        registry,
        test_bodies,
    };

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    worker::run(ctx, stdin, stdout).await
}
