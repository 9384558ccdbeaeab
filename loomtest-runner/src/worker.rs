// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker runtime (C4, spec.md §4.4).
//!
//! Runs inside the re-exec'd `__loomtest-worker` process (see
//! `loomtest-cli::worker_main`). Owns one persistent worker-scope
//! [`FixtureScope`] for its whole lifetime and a fresh test-scope
//! `FixtureScope` per test, and speaks the framed protocol in `ipc` over
//! its stdin/stdout.

use crate::deadline::{self, DeadlineHandle};
use crate::errors::TestError as EngineTestError;
use crate::fixture::{FixtureContext, FixtureRegistry, FixtureScope, Scope};
use crate::ipc::{read_frame, write_frame, ParentToWorker, StdioStream, WorkerToParent};
use crate::loader::TestBody;
use crate::time::{stopwatch, Deadline};
use loomtest_metadata::{AttemptStatus, TestError as ReportError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Floor applied to test-scope teardown's deadline (spec.md §4.4 step 5:
/// `max(remainingTime, teardownFloor)`), so a test that used its entire
/// budget still gets a real chance to release its fixtures cleanly.
const TEARDOWN_FLOOR: Duration = Duration::from_secs(5);

/// Everything a worker process needs to serve `Run` requests: the fixture
/// registry (identical across every worker in a run) and the catalog of
/// test bodies it may be asked to execute.
pub struct WorkerContext {
    pub worker_index: usize,
    pub registry: FixtureRegistry,
    pub test_bodies: HashMap<u64, TestBody>,
}

/// Drives the worker's message loop until it receives `Stop` or its
/// parent closes the pipe.
pub async fn run<R, W>(ctx: WorkerContext, mut input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let bound_hash = match read_frame::<_, ParentToWorker>(&mut input).await? {
        Some(ParentToWorker::Init { fixture_hash }) => {
            tracing::info!(worker_index = ctx.worker_index, fixture_hash, "worker ready");
            fixture_hash
        }
        other => {
            tracing::warn!(?other, "worker expected Init as its first message");
            return Ok(());
        }
    };

    let mut worker_scope = FixtureScope::new(Scope::Worker, ctx.registry.clone());
    write_frame(&mut output, &WorkerToParent::Ready).await?;

    loop {
        match read_frame::<_, ParentToWorker>(&mut input).await? {
            Some(ParentToWorker::Run {
                test_id,
                fixture_refs,
                timeout,
            }) => {
                write_frame(&mut output, &WorkerToParent::TestBegin { test_id }).await?;
                let message =
                    run_one_test(&ctx, &mut worker_scope, &bound_hash, test_id, &fixture_refs, timeout, &mut output)
                        .await;
                let failed = matches!(
                    &message,
                    WorkerToParent::TestEnd {
                        status: AttemptStatus::Failed | AttemptStatus::TimedOut,
                        ..
                    }
                );
                write_frame(&mut output, &message).await?;

                if failed {
                    // spec.md §4.4 step 7: one failure discards the worker.
                    // Tell the parent it still owes this worker a shutdown,
                    // then serve nothing but `Stop` from here on — the
                    // worker-scope fixtures may be unusable, so no further
                    // `Run` is accepted and no further teardown is attempted.
                    write_frame(&mut output, &WorkerToParent::Done { pending_worker: true }).await?;
                    loop {
                        match read_frame::<_, ParentToWorker>(&mut input).await? {
                            Some(ParentToWorker::Stop) | None => return Ok(()),
                            _ => tracing::warn!("worker already failed; ignoring message until `Stop`"),
                        }
                    }
                }
            }
            Some(ParentToWorker::Stop) | None => {
                let teardown_errors = worker_scope.teardown().await;
                for error in &teardown_errors {
                    tracing::error!(%error, "worker-scope fixture teardown failed during shutdown");
                }
                write_frame(
                    &mut output,
                    &WorkerToParent::Done {
                        pending_worker: false,
                    },
                )
                .await
                .ok();
                return Ok(());
            }
            Some(ParentToWorker::Init { .. }) => {
                tracing::warn!("ignoring unexpected re-`Init` mid-run");
            }
        }
    }
}

async fn run_one_test<W>(
    ctx: &WorkerContext,
    worker_scope: &mut FixtureScope,
    bound_hash: &str,
    test_id: u64,
    fixture_refs: &[String],
    timeout: Duration,
    output: &mut W,
) -> WorkerToParent
where
    W: AsyncWrite + Unpin,
{
    // spec.md §4.4: a worker must never be dispatched a test whose
    // worker-hash differs from the one it was `Init`-ed with. Reject rather
    // than run it, in case the dispatcher ever sends one anyway.
    match ctx.registry.worker_hash(fixture_refs) {
        Ok(expected) if expected.to_string() == bound_hash => {}
        Ok(expected) => {
            return WorkerToParent::TestEnd {
                test_id,
                status: AttemptStatus::Failed,
                duration: Duration::ZERO,
                error: Some(engine_error_to_report(EngineTestError::HashMismatch {
                    bound: bound_hash.to_owned(),
                    expected: expected.to_string(),
                })),
                annotations: vec![],
            };
        }
        Err(err) => {
            return WorkerToParent::TestEnd {
                test_id,
                status: AttemptStatus::Failed,
                duration: Duration::ZERO,
                error: Some(ReportError::from_message(err.to_string())),
                annotations: vec![],
            };
        }
    }

    let Some(body) = ctx.test_bodies.get(&test_id) else {
        return WorkerToParent::TestEnd {
            test_id,
            status: AttemptStatus::Failed,
            duration: Duration::ZERO,
            error: Some(ReportError::from_message(format!(
                "worker {} has no test body registered for test {test_id}",
                ctx.worker_index
            ))),
            annotations: vec![],
        };
    };
    let body = body.clone();

    let mut test_scope = FixtureScope::new_with_parent(Scope::Test, ctx.registry.clone(), worker_scope);
    let watch = stopwatch();

    let deadline = if timeout.is_zero() {
        Deadline::never()
    } else {
        Deadline::after(timeout)
    };
    let handle = DeadlineHandle::new(deadline);

    let outcome = deadline::run(&handle, execute(&mut test_scope, fixture_refs, body)).await;
    let (captured, outcome) = match outcome {
        deadline::DeadlineOutcome::Completed((captured, result)) => {
            (captured, deadline::DeadlineOutcome::Completed(result))
        }
        deadline::DeadlineOutcome::TimedOut => (Vec::new(), deadline::DeadlineOutcome::TimedOut),
    };

    for (is_stderr, line) in captured {
        let stream = if is_stderr { StdioStream::Stderr } else { StdioStream::Stdout };
        if let Err(error) = write_frame(output, &WorkerToParent::Stdio { test_id, stream, chunk: line }).await {
            tracing::warn!(%error, test_id, "failed to forward captured test output");
        }
    }

    for (name, value) in test_scope.detach_worker_values(&ctx.registry) {
        worker_scope.adopt(name, value);
    }

    // Teardown gets its own deadline (spec.md §4.4 step 5:
    // `max(remainingTime, teardownFloor)`) so a test that used its whole
    // budget still gets a real chance to release its fixtures.
    let teardown_deadline = Deadline::after(handle.current().await.remaining().max(TEARDOWN_FLOOR));
    let teardown_handle = DeadlineHandle::new(teardown_deadline);
    let teardown_outcome = deadline::run(&teardown_handle, test_scope.teardown()).await;
    let teardown_errors = match teardown_outcome {
        deadline::DeadlineOutcome::Completed(errors) => errors,
        deadline::DeadlineOutcome::TimedOut => vec![crate::errors::FixtureError::SetupFailed {
            fixture: "<test-scope teardown>".to_owned(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "test-scope teardown exceeded its deadline",
            )),
        }],
    };

    let duration = watch.snapshot().elapsed;
    let (status, error) = match outcome {
        deadline::DeadlineOutcome::Completed(Ok(())) if teardown_errors.is_empty() => {
            (AttemptStatus::Passed, None)
        }
        deadline::DeadlineOutcome::Completed(Ok(())) => (
            AttemptStatus::Failed,
            Some(ReportError::from_message(
                teardown_errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        ),
        deadline::DeadlineOutcome::Completed(Err(err)) => (AttemptStatus::Failed, Some(engine_error_to_report(err))),
        deadline::DeadlineOutcome::TimedOut => (
            AttemptStatus::TimedOut,
            Some(ReportError::from_message("test exceeded its deadline")),
        ),
    };

    WorkerToParent::TestEnd {
        test_id,
        status,
        duration,
        error,
        annotations: vec![],
    }
}

async fn execute(
    test_scope: &mut FixtureScope,
    fixture_refs: &[String],
    body: TestBody,
) -> (Vec<(bool, String)>, Result<(), EngineTestError>) {
    let mut ctx = FixtureContext::default();
    for name in fixture_refs {
        let value = match test_scope.resolve(name).await {
            Ok(value) => value,
            Err(err) => return (Vec::new(), Err(EngineTestError::user(err.to_string()))),
        };
        ctx.insert(name.clone(), value);
    }
    let output = ctx.output_handle();
    let result = (body.0)(ctx).await.map_err(|err| EngineTestError::user(err.to_string()));
    (output.take(), result)
}

fn engine_error_to_report(err: EngineTestError) -> ReportError {
    match err {
        EngineTestError::User { message, stack } => ReportError::Message { message, stack },
        EngineTestError::Timeout => ReportError::from_message("test timed out"),
        EngineTestError::WorkerCrash(message) => ReportError::from_message(message),
        EngineTestError::HashMismatch { bound, expected } => ReportError::from_message(format!(
            "worker is bound to fixture hash {bound}, but this test requires {expected}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureDef;
    use std::sync::Arc;

    fn registry_with_counter() -> (FixtureRegistry, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let setup_counter = counter.clone();
        let mut registry = FixtureRegistry::new();
        registry
            .register(FixtureDef::new::<u32, _>("db", Scope::Worker, vec![], move |_ctx| {
                setup_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { Ok(1u32) }
            }))
            .unwrap();
        (registry, counter)
    }

    #[tokio::test]
    async fn worker_fixture_is_set_up_once_across_two_tests() {
        let (registry, counter) = registry_with_counter();
        let mut bodies = HashMap::new();
        bodies.insert(1u64, TestBody::new(|ctx: FixtureContext| async move {
            let _db = ctx.get::<u32>("db");
            Ok(())
        }));
        bodies.insert(2u64, bodies.get(&1).unwrap().clone());

        let ctx = WorkerContext {
            worker_index: 0,
            registry,
            test_bodies: bodies,
        };
        let mut worker_scope = FixtureScope::new(Scope::Worker, ctx.registry.clone());
        let bound_hash = ctx.registry.worker_hash(&["db".to_owned()]).unwrap().to_string();

        let mut sink = Vec::new();
        let first =
            run_one_test(&ctx, &mut worker_scope, &bound_hash, 1, &["db".to_owned()], Duration::from_secs(5), &mut sink)
                .await;
        let second =
            run_one_test(&ctx, &mut worker_scope, &bound_hash, 2, &["db".to_owned()], Duration::from_secs(5), &mut sink)
                .await;

        assert!(matches!(
            first,
            WorkerToParent::TestEnd { status: AttemptStatus::Passed, .. }
        ));
        assert!(matches!(
            second,
            WorkerToParent::TestEnd { status: AttemptStatus::Passed, .. }
        ));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);

        let errors = worker_scope.teardown().await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_exceeding_timeout_reports_timed_out() {
        let registry = FixtureRegistry::new();
        registry.validate().unwrap();
        let mut bodies = HashMap::new();
        bodies.insert(
            1u64,
            TestBody::new(|_ctx: FixtureContext| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        );
        let ctx = WorkerContext {
            worker_index: 0,
            registry,
            test_bodies: bodies,
        };
        let mut worker_scope = FixtureScope::new(Scope::Worker, ctx.registry.clone());
        let bound_hash = ctx.registry.worker_hash(&[]).unwrap().to_string();
        let mut sink = Vec::new();
        let result =
            run_one_test(&ctx, &mut worker_scope, &bound_hash, 1, &[], Duration::from_millis(10), &mut sink).await;
        assert!(matches!(
            result,
            WorkerToParent::TestEnd { status: AttemptStatus::TimedOut, .. }
        ));
    }

    #[tokio::test]
    async fn mismatched_worker_hash_is_rejected_without_running_the_body() {
        let (registry, counter) = registry_with_counter();
        let mut bodies = HashMap::new();
        bodies.insert(
            1u64,
            TestBody::new(|_ctx: FixtureContext| async { panic!("body must not run on a hash mismatch") }),
        );
        let ctx = WorkerContext {
            worker_index: 0,
            registry,
            test_bodies: bodies,
        };
        let mut worker_scope = FixtureScope::new(Scope::Worker, ctx.registry.clone());

        let mut sink = Vec::new();
        let result = run_one_test(
            &ctx,
            &mut worker_scope,
            "stale-hash",
            1,
            &["db".to_owned()],
            Duration::from_secs(5),
            &mut sink,
        )
        .await;

        assert!(matches!(
            result,
            WorkerToParent::TestEnd { status: AttemptStatus::Failed, .. }
        ));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[allow(dead_code)]
    fn assert_clone_arc() -> Arc<()> {
        Arc::new(())
    }
}
