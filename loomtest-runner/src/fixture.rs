// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixture registry (C1, spec.md §4.1).
//!
//! A fixture is modeled as two callbacks — `setup` and an optional
//! `teardown` — rather than as a suspended continuation, per the design
//! note in spec.md §9 ("avoid modelling it as generator magic"). `setup`
//! returning is the fixture's "publish point"; `teardown` runs at scope end.

use futures::future::BoxFuture;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use xxhash_rust::xxh3::Xxh3;

use crate::errors::FixtureError;

/// The lifetime a fixture's instance is scoped to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Scope {
    /// Torn down at the end of each test.
    Test,
    /// Torn down when the worker exits (or is discarded).
    Worker,
}

/// An erased fixture value, shareable across the dependents that resolved
/// it within the same scope.
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

pub type FixtureResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A test body's captured stdout/stderr, collected in-process since the
/// worker can't redirect its own OS-level stdio (it *is* the process
/// serving IPC over that same stdio). Forwarded to the dispatcher as
/// `Stdio` IPC messages once the test body returns.
#[derive(Clone, Default)]
pub struct OutputSink(Arc<std::sync::Mutex<Vec<(bool, String)>>>);

impl OutputSink {
    fn push(&self, is_stderr: bool, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.push((is_stderr, line));
    }

    /// Drains every captured line, `true` marking a stderr line.
    pub(crate) fn take(&self) -> Vec<(bool, String)> {
        let mut lines = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut lines)
    }
}

/// Dependency values made available to a fixture's `setup` callback, and to
/// a test body alongside its resolved fixtures.
#[derive(Default)]
pub struct FixtureContext {
    values: HashMap<String, FixtureValue>,
    output: OutputSink,
}

impl FixtureContext {
    pub(crate) fn insert(&mut self, name: String, value: FixtureValue) {
        self.values.insert(name, value);
    }

    /// Fetches a named dependency, downcast to `T`.
    ///
    /// Panics if `name` was not declared as a dependency or does not
    /// downcast to `T` — both are registry bugs caught by
    /// [`FixtureRegistry::validate`], never a user-facing condition.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Arc<T> {
        self.values
            .get(name)
            .unwrap_or_else(|| panic!("fixture dependency `{name}` was not resolved"))
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("fixture dependency `{name}` had an unexpected type"))
    }

    /// Records a line of stdout for this test, in place of a real
    /// `println!` (which would land on the worker process's own stdout,
    /// already in use for IPC framing).
    pub fn print(&self, line: impl Into<String>) {
        self.output.push(false, line.into());
    }

    /// As [`FixtureContext::print`], for stderr.
    pub fn eprint(&self, line: impl Into<String>) {
        self.output.push(true, line.into());
    }

    pub(crate) fn output_handle(&self) -> OutputSink {
        self.output.clone()
    }
}

type SetupFn = Arc<dyn Fn(FixtureContext) -> BoxFuture<'static, FixtureResult<FixtureValue>> + Send + Sync>;
type TeardownFn = Arc<dyn Fn(FixtureValue) -> BoxFuture<'static, FixtureResult<()>> + Send + Sync>;

/// A registered fixture definition.
#[derive(Clone)]
pub struct FixtureDef {
    pub name: String,
    pub scope: Scope,
    pub deps: Vec<String>,
    /// A stable identity for this definition, used by [`worker_hash`].
    /// Stands in for the source-location/function-pointer identity a
    /// compiled-ahead-of-time loader would provide.
    pub definition_id: u64,
    setup: SetupFn,
    teardown: Option<TeardownFn>,
}

impl FixtureDef {
    fn definition_id(name: &str, scope: Scope, deps: &[String]) -> u64 {
        let mut hasher = Xxh3::new();
        std::hash::Hash::hash(&name, &mut hasher);
        std::hash::Hash::hash(&scope, &mut hasher);
        for dep in deps {
            std::hash::Hash::hash(dep, &mut hasher);
        }
        hasher.digest()
    }

    fn erase_setup<T, Fut>(setup: impl Fn(FixtureContext) -> Fut + Send + Sync + 'static) -> SetupFn
    where
        T: Send + Sync + 'static,
        Fut: std::future::Future<Output = FixtureResult<T>> + Send + 'static,
    {
        Arc::new(move |ctx| {
            let fut = setup(ctx);
            Box::pin(async move {
                let value = fut.await?;
                Ok(Arc::new(value) as FixtureValue)
            })
        })
    }

    /// Builds a fixture definition with no teardown step.
    pub fn new<T, Fut>(
        name: impl Into<String>,
        scope: Scope,
        deps: Vec<String>,
        setup: impl Fn(FixtureContext) -> Fut + Send + Sync + 'static,
    ) -> Self
    where
        T: Send + Sync + 'static,
        Fut: std::future::Future<Output = FixtureResult<T>> + Send + 'static,
    {
        let name = name.into();
        let definition_id = Self::definition_id(&name, scope, &deps);
        Self {
            setup: Self::erase_setup::<T, Fut>(setup),
            teardown: None,
            name,
            scope,
            deps,
            definition_id,
        }
    }

    /// Builds a fixture definition whose value is torn down, in reverse
    /// setup order, at scope end (spec.md §4.1).
    pub fn with_teardown<T, Fut, TFut>(
        name: impl Into<String>,
        scope: Scope,
        deps: Vec<String>,
        setup: impl Fn(FixtureContext) -> Fut + Send + Sync + 'static,
        teardown: impl Fn(Arc<T>) -> TFut + Send + Sync + 'static,
    ) -> Self
    where
        T: Send + Sync + 'static,
        Fut: std::future::Future<Output = FixtureResult<T>> + Send + 'static,
        TFut: std::future::Future<Output = FixtureResult<()>> + Send + 'static,
    {
        let name = name.into();
        let definition_id = Self::definition_id(&name, scope, &deps);
        let teardown: TeardownFn = Arc::new(move |value: FixtureValue| {
            let value = value
                .downcast::<T>()
                .unwrap_or_else(|_| panic!("teardown received a mistyped fixture value"));
            Box::pin(teardown(value))
        });
        Self {
            setup: Self::erase_setup::<T, Fut>(setup),
            teardown: Some(teardown),
            name,
            scope,
            deps,
            definition_id,
        }
    }
}

/// Holds named fixtures with their scope and declared dependencies.
#[derive(Clone, Default)]
pub struct FixtureRegistry {
    defs: HashMap<String, FixtureDef>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fixture. Fails with [`FixtureError::DuplicateFixture`]
    /// if `name` is already registered.
    pub fn register(&mut self, def: FixtureDef) -> Result<(), FixtureError> {
        if self.defs.contains_key(&def.name) {
            return Err(FixtureError::DuplicateFixture(def.name));
        }
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FixtureDef> {
        self.defs.get(name)
    }

    /// Validates the scope invariant (a worker fixture may not depend on a
    /// test fixture) and the acyclic invariant, over every registered
    /// fixture. Called once after all fixtures have been registered.
    pub fn validate(&self) -> Result<(), FixtureError> {
        for def in self.defs.values() {
            for dep_name in &def.deps {
                let dep = self
                    .defs
                    .get(dep_name)
                    .ok_or_else(|| FixtureError::UnknownFixture(dep_name.clone()))?;
                if def.scope == Scope::Worker && dep.scope == Scope::Test {
                    return Err(FixtureError::InvalidScope {
                        worker: def.name.clone(),
                        dep: dep_name.clone(),
                    });
                }
            }
        }
        for name in self.defs.keys() {
            self.topo_order(std::slice::from_ref(name))?;
        }
        Ok(())
    }

    /// Returns the setup order (topological order of dependencies first) for
    /// the transitive closure of `required`.
    pub fn topo_order(&self, required: &[String]) -> Result<Vec<String>, FixtureError> {
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();
        let mut order = Vec::new();

        fn visit(
            registry: &FixtureRegistry,
            name: &str,
            visited: &mut HashSet<String>,
            in_progress: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) -> Result<(), FixtureError> {
            if visited.contains(name) {
                return Ok(());
            }
            if !in_progress.insert(name.to_owned()) {
                return Err(FixtureError::CyclicFixture(name.to_owned()));
            }
            let def = registry
                .get(name)
                .ok_or_else(|| FixtureError::UnknownFixture(name.to_owned()))?;
            for dep in &def.deps {
                visit(registry, dep, visited, in_progress, order)?;
            }
            in_progress.remove(name);
            visited.insert(name.to_owned());
            order.push(name.to_owned());
            Ok(())
        }

        for name in required {
            visit(self, name, &mut visited, &mut in_progress, &mut order)?;
        }
        Ok(order)
    }

    /// Computes the transitive closure of worker-scope fixtures required by
    /// `required` and hashes `(name, definition_id)` pairs, sorted by name,
    /// into a stable [`FixtureHash`] (spec.md §3).
    pub fn worker_hash(&self, required: &[String]) -> Result<FixtureHash, FixtureError> {
        let order = self.topo_order(required)?;
        let mut worker_names: Vec<&str> = order
            .iter()
            .filter(|name| {
                self.defs
                    .get(*name)
                    .map(|def| def.scope == Scope::Worker)
                    .unwrap_or(false)
            })
            .map(|s| s.as_str())
            .collect();
        worker_names.sort_unstable();

        let mut hasher = Xxh3::new();
        for name in worker_names {
            let def = &self.defs[name];
            std::hash::Hash::hash(name, &mut hasher);
            std::hash::Hash::hash(&def.definition_id, &mut hasher);
        }
        Ok(FixtureHash(hasher.digest()))
    }
}

/// A stable digest over the worker-scope fixtures transitively required by a
/// test. Two tests share a worker iff their `FixtureHash`es match.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct FixtureHash(pub u64);

impl std::fmt::Display for FixtureHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Live instance state for one scope (one test, or one worker's lifetime).
///
/// Instantiates fixtures lazily and idempotently, and tears them down in
/// reverse topological order. A teardown failure is recorded but does not
/// mask the outcome of the unit (test) whose teardown triggered it.
pub struct FixtureScope {
    scope: Scope,
    registry: FixtureRegistry,
    values: HashMap<String, FixtureValue>,
    setup_order: Vec<String>,
}

impl FixtureScope {
    pub fn new(scope: Scope, registry: FixtureRegistry) -> Self {
        Self {
            scope,
            registry,
            values: HashMap::new(),
            setup_order: Vec::new(),
        }
    }

    /// Builds a test-scope [`FixtureScope`] that shares `parent`'s already
    /// resolved values (worker-scope fixtures a prior test in this worker
    /// instantiated) without taking ownership of their teardown: only
    /// values resolved fresh through `self` are torn down by
    /// [`FixtureScope::teardown`].
    pub fn new_with_parent(scope: Scope, registry: FixtureRegistry, parent: &FixtureScope) -> Self {
        Self {
            scope,
            registry,
            values: parent.values.clone(),
            setup_order: Vec::new(),
        }
    }

    pub fn values(&self) -> &HashMap<String, FixtureValue> {
        &self.values
    }

    /// Removes and returns every fixture this scope instantiated fresh
    /// (i.e. not inherited via [`FixtureScope::new_with_parent`]) whose
    /// definition is worker-scoped. Used by the worker runtime to lift a
    /// worker fixture's first instantiation — which may happen inside any
    /// test, not just the first one — out of that test's own scope so the
    /// test's teardown does not tear it down along with its own fixtures.
    pub fn detach_worker_values(&mut self, registry: &FixtureRegistry) -> Vec<(String, FixtureValue)> {
        let mut detached = Vec::new();
        let values = &mut self.values;
        self.setup_order.retain(|name| {
            let is_worker = registry.get(name).map(|def| def.scope == Scope::Worker).unwrap_or(false);
            if is_worker {
                if let Some(value) = values.remove(name) {
                    detached.push((name.clone(), value));
                }
                false
            } else {
                true
            }
        });
        detached
    }

    /// Adopts a fixture value detached from a child scope, making this
    /// scope responsible for its eventual teardown. A no-op if `name` is
    /// already held (e.g. a concurrent test detached the same fixture).
    pub fn adopt(&mut self, name: String, value: FixtureValue) {
        if !self.values.contains_key(&name) {
            self.values.insert(name.clone(), value);
            self.setup_order.push(name);
        }
    }

    /// Instantiates (if needed) and returns the value for `name`, along with
    /// every transitive dependency, in topological order.
    pub async fn resolve(&mut self, name: &str) -> Result<FixtureValue, FixtureError> {
        let order = self.registry.topo_order(std::slice::from_ref(&name.to_owned()))?;
        for dep_name in order {
            if self.values.contains_key(&dep_name) {
                continue;
            }
            let def = self
                .registry
                .get(&dep_name)
                .ok_or_else(|| FixtureError::UnknownFixture(dep_name.clone()))?
                .clone();
            debug_assert!(
                def.scope == self.scope || def.scope == Scope::Worker,
                "a test scope may resolve worker fixtures, never the reverse"
            );

            let mut ctx = FixtureContext::default();
            for dep in &def.deps {
                ctx.insert(
                    dep.clone(),
                    self.values
                        .get(dep)
                        .expect("dependency resolved earlier in topo order")
                        .clone(),
                );
            }
            let value = (def.setup)(ctx).await.map_err(|source| FixtureError::SetupFailed {
                fixture: dep_name.clone(),
                source,
            })?;
            self.values.insert(dep_name.clone(), value);
            self.setup_order.push(dep_name);
        }
        Ok(self.values[name].clone())
    }

    /// Tears down every instantiated fixture in reverse setup order,
    /// collecting (rather than short-circuiting on) teardown errors.
    pub async fn teardown(&mut self) -> Vec<FixtureError> {
        let mut errors = Vec::new();
        for name in self.setup_order.drain(..).rev() {
            let Some(value) = self.values.remove(&name) else {
                continue;
            };
            let Some(def) = self.registry.get(&name) else {
                continue;
            };
            if let Some(teardown) = &def.teardown {
                if let Err(source) = teardown(value).await {
                    errors.push(FixtureError::SetupFailed {
                        fixture: name,
                        source,
                    });
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_fixture(name: &str, scope: Scope, deps: Vec<String>, value: &'static str) -> FixtureDef {
        FixtureDef::new::<String, _>(name, scope, deps, move |_ctx| async move {
            Ok(value.to_owned())
        })
    }

    #[test]
    fn duplicate_fixture_rejected() {
        let mut registry = FixtureRegistry::new();
        registry
            .register(string_fixture("a", Scope::Test, vec![], "a"))
            .unwrap();
        let err = registry
            .register(string_fixture("a", Scope::Test, vec![], "a"))
            .unwrap_err();
        assert!(matches!(err, FixtureError::DuplicateFixture(name) if name == "a"));
    }

    #[test]
    fn worker_depending_on_test_is_invalid_scope() {
        let mut registry = FixtureRegistry::new();
        registry
            .register(string_fixture("t", Scope::Test, vec![], "t"))
            .unwrap();
        registry
            .register(string_fixture("w", Scope::Worker, vec!["t".to_owned()], "w"))
            .unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, FixtureError::InvalidScope { .. }));
    }

    #[test]
    fn cycle_is_detected() {
        let mut registry = FixtureRegistry::new();
        registry
            .register(string_fixture("a", Scope::Test, vec!["b".to_owned()], "a"))
            .unwrap();
        registry
            .register(string_fixture("b", Scope::Test, vec!["a".to_owned()], "b"))
            .unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, FixtureError::CyclicFixture(_)));
    }

    #[test]
    fn worker_hash_ignores_test_scope_fixtures() {
        let mut registry = FixtureRegistry::new();
        registry
            .register(string_fixture("db", Scope::Worker, vec![], "db"))
            .unwrap();
        registry
            .register(string_fixture("page", Scope::Test, vec!["db".to_owned()], "page"))
            .unwrap();
        registry.validate().unwrap();

        let hash_from_test = registry.worker_hash(&["page".to_owned()]).unwrap();
        let hash_from_worker_direct = registry.worker_hash(&["db".to_owned()]).unwrap();
        assert_eq!(
            hash_from_test, hash_from_worker_direct,
            "only the worker-scope closure should affect the hash"
        );
    }

    #[test]
    fn distinct_worker_fixtures_yield_distinct_hashes() {
        let mut registry = FixtureRegistry::new();
        registry
            .register(string_fixture("db", Scope::Worker, vec![], "db"))
            .unwrap();
        registry
            .register(string_fixture("cache", Scope::Worker, vec![], "cache"))
            .unwrap();
        registry.validate().unwrap();

        let db_hash = registry.worker_hash(&["db".to_owned()]).unwrap();
        let cache_hash = registry.worker_hash(&["cache".to_owned()]).unwrap();
        assert_ne!(db_hash, cache_hash);
    }

    #[tokio::test]
    async fn resolve_instantiates_deps_in_topo_order_and_memoizes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let setup_count = Arc::new(AtomicUsize::new(0));

        let mut registry = FixtureRegistry::new();
        let counter = setup_count.clone();
        registry
            .register(FixtureDef::new::<u32, _>(
                "base",
                Scope::Worker,
                vec![],
                move |_ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(7u32) }
                },
            ))
            .unwrap();
        registry
            .register(FixtureDef::new::<u32, _>(
                "derived",
                Scope::Test,
                vec!["base".to_owned()],
                |ctx| {
                    let base = ctx.get::<u32>("base");
                    async move { Ok(*base + 1) }
                },
            ))
            .unwrap();
        registry.validate().unwrap();

        let mut scope = FixtureScope::new(Scope::Test, registry);
        let value = scope.resolve("derived").await.unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 8);
        // Resolving again must not re-run `base`'s setup.
        scope.resolve("base").await.unwrap();
        assert_eq!(setup_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_runs_in_reverse_order() {
        let order = Arc::new(parking_lot_free_mutex());
        let order_a = order.clone();
        let order_b = order.clone();

        let mut registry = FixtureRegistry::new();
        registry
            .register(FixtureDef::with_teardown(
                "a",
                Scope::Test,
                vec![],
                |_ctx| async move { Ok(()) },
                move |_v: Arc<()>| {
                    let order_a = order_a.clone();
                    async move {
                        order_a.lock().unwrap().push("a");
                        Ok(())
                    }
                },
            ))
            .unwrap();
        registry
            .register(FixtureDef::with_teardown(
                "b",
                Scope::Test,
                vec!["a".to_owned()],
                |_ctx| async move { Ok(()) },
                move |_v: Arc<()>| {
                    let order_b = order_b.clone();
                    async move {
                        order_b.lock().unwrap().push("b");
                        Ok(())
                    }
                },
            ))
            .unwrap();
        registry.validate().unwrap();

        let mut scope = FixtureScope::new(Scope::Test, registry);
        scope.resolve("b").await.unwrap();
        let errors = scope.teardown().await;
        assert!(errors.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    fn parking_lot_free_mutex() -> Arc<std::sync::Mutex<Vec<&'static str>>> {
        Arc::new(std::sync::Mutex::new(Vec::new()))
    }
}
