// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The embedded test harness this binary runs.
//!
//! Discovering test files and turning source-level test declarations into a
//! [`Suite`] tree is out of scope for the engine (see `loomtest_runner::loader`);
//! a real installation plugs in a loader that walks a crate's test targets.
//! This module is that plug, fixed at compile time the way `datatest-stable`'s
//! `harness!` macro fixes a root/pattern pair: it registers a small, fixed
//! set of fixtures and tests directly.
//!
//! Both the dispatching process and each re-exec'd worker process call
//! [`build`] independently — since they're the same compiled binary calling
//! the same deterministic function, they arrive at identical fixture
//! registries and identical `(suite, project) -> TestId` assignments without
//! needing to ship closures across the process boundary.

use loomtest_runner::fixture::{FixtureContext, FixtureDef, Scope};
use loomtest_runner::loader::TestBody;
use loomtest_runner::test_tree::{Annotation, Spec};
use loomtest_runner::{FixtureRegistry, Suite};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Builds the fixture registry and suite tree this binary runs.
pub fn build() -> (FixtureRegistry, Suite) {
    let mut registry = FixtureRegistry::new();

    registry
        .register(FixtureDef::with_teardown::<Arc<AtomicUsize>, _, _>(
            "worker_id_pool",
            Scope::Worker,
            vec![],
            |_ctx: FixtureContext| async { Ok(Arc::new(AtomicUsize::new(0))) },
            |_pool| async { Ok(()) },
        ))
        .expect("harness fixtures are registered once");

    registry
        .register(FixtureDef::new::<String, _>(
            "greeting",
            Scope::Test,
            vec![],
            |_ctx: FixtureContext| async { Ok("hello from loomtest".to_owned()) },
        ))
        .expect("harness fixtures are registered once");

    registry.validate().expect("harness fixtures satisfy the scope and acyclic invariants");

    let suite = Suite {
        title: "examples".to_owned(),
        file: "examples/smoke.rs".into(),
        suites: vec![],
        specs: vec![
            spec("greeting is resolved", vec!["greeting".to_owned()], |ctx| async move {
                let greeting = ctx.get::<String>("greeting");
                if greeting.is_empty() {
                    return Err("greeting fixture was empty".into());
                }
                Ok(())
            }),
            spec("worker pool is shared across tests", vec!["worker_id_pool".to_owned()], |ctx| async move {
                let pool = ctx.get::<Arc<AtomicUsize>>("worker_id_pool");
                pool.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ],
    };

    (registry, suite)
}

/// Indexes every spec's body by `(suite_path, spec_title)`, the only
/// identity a [`Test`](loomtest_runner::Test) retains once it has been
/// planned — used to look a body back up by the worker-side re-exec without
/// needing to serialize closures across the process boundary.
pub fn index_bodies(suite: &Suite) -> HashMap<(Vec<String>, String), TestBody> {
    let mut index = HashMap::new();
    walk(suite, &[], &mut index);
    index
}

fn walk(suite: &Suite, suite_path: &[String], index: &mut HashMap<(Vec<String>, String), TestBody>) {
    let mut path = suite_path.to_vec();
    if !suite.title.is_empty() {
        path.push(suite.title.clone());
    }
    for spec in &suite.specs {
        index.insert((path.clone(), spec.title.clone()), spec.body.clone());
    }
    for child in &suite.suites {
        walk(child, &path, index);
    }
}

fn spec<Fut>(
    title: &str,
    fixture_refs: Vec<String>,
    body: impl Fn(FixtureContext) -> Fut + Send + Sync + 'static,
) -> Spec
where
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send + 'static,
{
    Spec {
        title: title.to_owned(),
        file: "examples/smoke.rs".into(),
        line: 1,
        column: 1,
        only: false,
        annotations: Vec::<Annotation>::new(),
        fixture_refs,
        body: TestBody::new(body),
    }
}
