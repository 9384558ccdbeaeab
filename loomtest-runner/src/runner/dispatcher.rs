// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatcher (C5, spec.md §4.5): partitions tests by
//! [`FixtureHash`](crate::fixture::FixtureHash) and runs up to `workers`
//! worker processes concurrently, recycling a worker only when it must
//! switch to serving a different hash.

use super::executor::{SpawnWorker, WorkerProcess};
use crate::errors::DispatchError;
use crate::fixture::FixtureHash;
use crate::ipc::{ParentToWorker, WorkerToParent};
use crate::test_tree::{ExpectedStatus, RunConfig, Test};
use loomtest_metadata::{AttemptStatus, RunEndStatus, TestError as ReportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Consecutive spawn failures for a single slot before giving up on the run
/// entirely: a worker binary that is merely slow to start should survive a
/// retry or two, but a binary that is missing or consistently crashing on
/// launch is an environment problem the dispatcher cannot route around.
const MAX_CONSECUTIVE_SPAWN_FAILURES: u32 = 3;

/// The result of a full run: every test with its accumulated
/// [`TestResult`](crate::test_tree::TestResult)s, and the run's overall
/// disposition.
pub struct RunOutcome {
    pub tests: Vec<Test>,
    pub end_status: RunEndStatus,
}

struct SchedulerState {
    tests: Vec<Test>,
    queues: HashMap<FixtureHash, VecDeque<usize>>,
    hash_order: Vec<FixtureHash>,
    remaining: usize,
    failures: usize,
    stopped_for: Option<RunEndStatus>,
}

impl SchedulerState {
    /// Tests with `expected_status == Skipped` (a `skip`/`fixme` annotation,
    /// spec.md §4.2) are kept in `tests` for reporting but never enter a
    /// queue, so they're never dispatched to a worker at all.
    fn new(tests: Vec<Test>) -> Self {
        let mut queues: HashMap<FixtureHash, VecDeque<usize>> = HashMap::new();
        let mut hash_order = Vec::new();
        let mut remaining = 0;
        for (index, test) in tests.iter().enumerate() {
            if test.expected_status == ExpectedStatus::Skipped {
                continue;
            }
            let queue = queues.entry(test.fixture_hash).or_insert_with(|| {
                hash_order.push(test.fixture_hash);
                VecDeque::new()
            });
            queue.push_back(index);
            remaining += 1;
        }
        Self {
            tests,
            queues,
            hash_order,
            remaining,
            failures: 0,
            stopped_for: None,
        }
    }

    /// Picks the next test for a worker currently bound to `preferred` (if
    /// any), falling back to any other hash with pending work.
    fn next_for(&mut self, preferred: Option<FixtureHash>) -> Option<(FixtureHash, usize)> {
        if self.stopped_for.is_some() {
            return None;
        }
        if let Some(hash) = preferred {
            if let Some(index) = self.queues.get_mut(&hash).and_then(VecDeque::pop_front) {
                return Some((hash, index));
            }
        }
        for hash in self.hash_order.clone() {
            if Some(hash) == preferred {
                continue;
            }
            if let Some(index) = self.queues.get_mut(&hash).and_then(VecDeque::pop_front) {
                return Some((hash, index));
            }
        }
        None
    }

    fn requeue(&mut self, hash: FixtureHash, index: usize) {
        self.queues.entry(hash).or_default().push_front(index);
    }

    fn record_terminal(&mut self, index: usize, max_failures: Option<usize>) {
        self.remaining -= 1;
        let failed = !matches!(
            self.tests[index].final_status(),
            Some(crate::test_tree::FinalStatus::Passed)
                | Some(crate::test_tree::FinalStatus::Flaky)
                | Some(crate::test_tree::FinalStatus::Skipped)
        );
        if failed {
            self.failures += 1;
            if let Some(max) = max_failures {
                if self.failures >= max {
                    self.stopped_for = Some(RunEndStatus::Failed);
                }
            }
        }
    }
}

/// Runs every test in `tests` to completion (subject to `config`), using
/// `spawn_worker` to bring up worker processes on demand.
///
/// Returns `Err` only for a [`DispatchError`] — an unrecoverable,
/// dispatcher-internal failure (spec.md §7: "fatal, exit 3"), never for a
/// test's own failure or timeout.
pub async fn run(
    tests: Vec<Test>,
    config: &RunConfig,
    spawn_worker: SpawnWorker,
    interrupted: Arc<AtomicBool>,
) -> Result<RunOutcome, DispatchError> {
    let worker_count = config.workers.max(1);
    let state = Arc::new(Mutex::new(SchedulerState::new(tests)));

    let run_future = run_slots(state.clone(), worker_count, spawn_worker, config.max_failures, interrupted);

    let run_result = match config.global_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, run_future).await {
            Ok(result) => result,
            Err(_elapsed) => {
                let mut guard = state.lock().await;
                guard.stopped_for.get_or_insert(RunEndStatus::Timedout);
                Ok(())
            }
        },
        None => run_future.await,
    };
    run_result?;

    let guard = Arc::try_unwrap(state)
        .unwrap_or_else(|_| panic!("dispatcher slots outlived their run"))
        .into_inner();

    let end_status = guard.stopped_for.unwrap_or_else(|| {
        if guard.tests.iter().any(|t| {
            matches!(
                t.final_status(),
                Some(crate::test_tree::FinalStatus::Failed) | Some(crate::test_tree::FinalStatus::TimedOut)
            )
        }) {
            RunEndStatus::Failed
        } else {
            RunEndStatus::Passed
        }
    });

    Ok(RunOutcome {
        tests: guard.tests,
        end_status,
    })
}

async fn run_slots(
    state: Arc<Mutex<SchedulerState>>,
    worker_count: usize,
    spawn_worker: SpawnWorker,
    max_failures: Option<usize>,
    interrupted: Arc<AtomicBool>,
) -> Result<(), DispatchError> {
    let mut slots = Vec::with_capacity(worker_count);
    for worker_index in 0..worker_count {
        let state = state.clone();
        let spawn_worker = spawn_worker.clone();
        let interrupted = interrupted.clone();
        slots.push(tokio::spawn(async move {
            run_slot(worker_index, state, spawn_worker, max_failures, interrupted).await
        }));
    }
    let mut first_error = None;
    for slot in slots {
        if let Ok(Err(err)) = slot.await {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_slot(
    worker_index: usize,
    state: Arc<Mutex<SchedulerState>>,
    spawn_worker: SpawnWorker,
    max_failures: Option<usize>,
    interrupted: Arc<AtomicBool>,
) -> Result<(), DispatchError> {
    let mut worker: Option<WorkerProcess> = None;
    let mut consecutive_spawn_failures = 0u32;

    loop {
        if interrupted.load(Ordering::Relaxed) {
            let mut guard = state.lock().await;
            guard.stopped_for.get_or_insert(RunEndStatus::Interrupted);
            break;
        }

        let bound = worker.as_ref().map(|w| w.bound_hash);
        let picked = {
            let mut guard = state.lock().await;
            guard.next_for(bound)
        };

        let Some((hash, index)) = picked else {
            break;
        };

        if bound != Some(hash) {
            if let Some(mut stale) = worker.take() {
                let _ = stale.send(&ParentToWorker::Stop).await;
                let _ = stale.recv().await;
            }
            match spawn_worker(worker_index, hash).await {
                Ok(fresh) => {
                    worker = Some(fresh);
                    consecutive_spawn_failures = 0;
                }
                Err(err) => {
                    consecutive_spawn_failures += 1;
                    tracing::error!(%err, worker_index, attempt = consecutive_spawn_failures, "failed to spawn worker");
                    if consecutive_spawn_failures >= MAX_CONSECUTIVE_SPAWN_FAILURES {
                        return Err(DispatchError::WorkerSpawn(err));
                    }
                    let mut guard = state.lock().await;
                    guard.requeue(hash, index);
                    continue;
                }
            }
        }

        let Some(active) = worker.as_mut() else { continue };
        let test_id = {
            let guard = state.lock().await;
            guard.tests[index].id.0
        };
        let (fixture_refs, timeout, retries_left) = {
            let guard = state.lock().await;
            let test = &guard.tests[index];
            (
                test.fixture_refs.clone(),
                test.timeout,
                test.retries.saturating_sub(test.results.len()),
            )
        };

        let attempt_result = run_single_attempt(active, test_id, fixture_refs, timeout).await;

        // Failure always discards the worker (spec.md §4.4 step 7): its
        // worker-scope fixtures may be in an unknown state, so it must not
        // be handed the next test, retried or not.
        let is_failure = match &attempt_result {
            Ok(result) => matches!(result.status, AttemptStatus::Failed | AttemptStatus::TimedOut),
            Err(_) => true,
        };
        if is_failure {
            if let Some(mut stale) = worker.take() {
                let _ = stale.send(&ParentToWorker::Stop).await;
                let _ = stale.recv().await;
            }
        }

        let mut guard = state.lock().await;
        match attempt_result {
            Ok(result) => {
                guard.tests[index].results.push(result);
                if is_failure && retries_left > 0 {
                    guard.requeue(hash, index);
                } else {
                    guard.record_terminal(index, max_failures);
                }
            }
            Err(crash) => {
                guard.tests[index].results.push(crash);
                if retries_left > 0 {
                    guard.requeue(hash, index);
                } else {
                    guard.record_terminal(index, max_failures);
                }
            }
        }
    }

    if let Some(mut active) = worker.take() {
        let _ = active.send(&ParentToWorker::Stop).await;
        let _ = active.recv().await;
    }
    Ok(())
}

/// Sends `Run` and pumps messages until this test's `TestEnd`, converting
/// a worker that disappears mid-test into a synthetic crash result.
async fn run_single_attempt(
    worker: &mut WorkerProcess,
    test_id: u64,
    fixture_refs: Vec<String>,
    timeout: Duration,
) -> Result<crate::test_tree::TestResult, crate::test_tree::TestResult> {
    let attempt_start = chrono::Local::now();

    if worker
        .send(&ParentToWorker::Run {
            test_id,
            fixture_refs,
            timeout,
        })
        .await
        .is_err()
    {
        return Err(crash_result(worker.worker_index, attempt_start));
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        match worker.recv().await {
            Ok(Some(WorkerToParent::TestBegin { .. })) => continue,
            Ok(Some(WorkerToParent::Stdio { stream, chunk, .. })) => {
                match stream {
                    crate::ipc::StdioStream::Stdout => stdout.push(chunk),
                    crate::ipc::StdioStream::Stderr => stderr.push(chunk),
                }
                continue;
            }
            Ok(Some(WorkerToParent::TestEnd {
                status,
                duration,
                error,
                ..
            })) => {
                return Ok(crate::test_tree::TestResult {
                    attempt: 0,
                    worker_index: worker.worker_index,
                    start_time: attempt_start,
                    duration,
                    status,
                    error,
                    stdout,
                    stderr,
                    attachments: Vec::new(),
                });
            }
            Ok(Some(WorkerToParent::TeardownError { error, .. })) => {
                tracing::warn!(?error, "worker-scope fixture teardown failed after this test's result was already recorded");
                continue;
            }
            Ok(Some(WorkerToParent::Done { .. })) | Ok(None) | Err(_) => {
                return Err(crash_result(worker.worker_index, attempt_start));
            }
            Ok(Some(WorkerToParent::Ready)) => continue,
        }
    }
}

fn crash_result(
    worker_index: usize,
    start_time: chrono::DateTime<chrono::Local>,
) -> crate::test_tree::TestResult {
    crate::test_tree::TestResult {
        attempt: 0,
        worker_index,
        start_time,
        duration: Duration::ZERO,
        status: AttemptStatus::Failed,
        error: Some(ReportError::from_message("worker process crashed or exited unexpectedly")),
        stdout: Vec::new(),
        stderr: Vec::new(),
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureContext, FixtureRegistry};
    use crate::loader::TestBody;
    use crate::runner::executor::test_double::in_process_spawner;
    use crate::test_tree::TestId;
    use crate::worker::WorkerContext;
    use std::collections::HashMap;

    fn make_test(fixture_hash: FixtureHash, body_id: u64) -> (Test, u64) {
        (
            Test {
                id: TestId(body_id),
                spec_title: format!("test-{body_id}"),
                suite_path: vec![],
                file: "tests/example.rs".into(),
                line: 1,
                column: 1,
                project: "default".to_owned(),
                fixture_hash,
                fixture_refs: vec![],
                timeout: Duration::from_secs(5),
                expected_status: ExpectedStatus::Passed,
                annotations: vec![],
                retries: 0,
                only: false,
                results: vec![],
            },
            body_id,
        )
    }

    #[tokio::test]
    async fn runs_every_test_and_reports_passed() {
        let hash = FixtureRegistry::new().worker_hash(&[]).unwrap();
        let (test_a, id_a) = make_test(hash, 1);
        let (test_b, id_b) = make_test(hash, 2);

        let mut bodies = HashMap::new();
        bodies.insert(id_a, TestBody::new(|_ctx: FixtureContext| async { Ok(()) }));
        bodies.insert(id_b, TestBody::new(|_ctx: FixtureContext| async { Ok(()) }));
        let bodies = Arc::new(bodies);

        let make_context = {
            let bodies = bodies.clone();
            Arc::new(move |worker_index: usize| WorkerContext {
                worker_index,
                registry: FixtureRegistry::new(),
                test_bodies: (*bodies).clone(),
            })
        };
        let spawn = in_process_spawner(make_context);

        let config = RunConfig {
            workers: 2,
            ..Default::default()
        };
        let outcome = run(vec![test_a, test_b], &config, spawn, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(outcome.tests.len(), 2);
        assert!(outcome
            .tests
            .iter()
            .all(|t| matches!(t.final_status(), Some(crate::test_tree::FinalStatus::Passed))));
        assert_eq!(outcome.end_status, RunEndStatus::Passed);
    }

    #[tokio::test]
    async fn skipped_tests_are_never_dispatched() {
        let hash = FixtureRegistry::new().worker_hash(&[]).unwrap();
        let (mut skipped, id_skipped) = make_test(hash, 1);
        skipped.expected_status = ExpectedStatus::Skipped;
        let (runnable, id_runnable) = make_test(hash, 2);

        let mut bodies = HashMap::new();
        bodies.insert(
            id_skipped,
            TestBody::new(|_ctx: FixtureContext| async { panic!("skipped test body must never run") }),
        );
        bodies.insert(id_runnable, TestBody::new(|_ctx: FixtureContext| async { Ok(()) }));
        let bodies = Arc::new(bodies);

        let make_context = {
            let bodies = bodies.clone();
            Arc::new(move |worker_index: usize| WorkerContext {
                worker_index,
                registry: FixtureRegistry::new(),
                test_bodies: (*bodies).clone(),
            })
        };
        let spawn = in_process_spawner(make_context);

        let config = RunConfig {
            workers: 1,
            ..Default::default()
        };
        let outcome = run(vec![skipped, runnable], &config, spawn, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(outcome.tests.len(), 2);
        let skipped_test = outcome.tests.iter().find(|t| t.id.0 == id_skipped).unwrap();
        assert!(skipped_test.results.is_empty());
        assert_eq!(skipped_test.final_status(), None);
        let runnable_test = outcome.tests.iter().find(|t| t.id.0 == id_runnable).unwrap();
        assert!(matches!(
            runnable_test.final_status(),
            Some(crate::test_tree::FinalStatus::Passed)
        ));
        assert_eq!(outcome.end_status, RunEndStatus::Passed);
    }
}
