// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The deadline runner (C3, spec.md §4.3): races an arbitrary future
//! against a mutable, extendable timeout.

use crate::time::Deadline;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The outcome of [`run`].
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    /// The future completed before the deadline.
    Completed(T),
    /// The deadline elapsed first. The future is dropped; if it has side
    /// effects in flight (e.g. a child process), the caller is responsible
    /// for cleaning those up separately — the deadline runner only cancels
    /// its own polling of the future, per spec.md §4.3's "abandon, don't
    /// kill" note.
    TimedOut,
}

/// A shared handle that lets a deadline be extended while a future is
/// racing against it — used when a `slow` annotation or a runtime API call
/// widens a test's timeout mid-flight.
#[derive(Clone)]
pub struct DeadlineHandle {
    inner: Arc<Mutex<Deadline>>,
}

impl DeadlineHandle {
    pub fn new(deadline: Deadline) -> Self {
        Self {
            inner: Arc::new(Mutex::new(deadline)),
        }
    }

    pub async fn current(&self) -> Deadline {
        *self.inner.lock().await
    }

    /// Replaces the deadline with a fresh one `duration` from now, the way
    /// `test.setTimeout()` widens the remaining budget rather than adding
    /// to the original deadline.
    pub async fn extend(&self, duration: std::time::Duration) {
        *self.inner.lock().await = Deadline::after(duration);
    }
}

/// Races `fut` against `handle`'s deadline, re-reading the deadline each
/// time it elapses in case a concurrent [`DeadlineHandle::extend`] moved
/// it further out.
pub async fn run<T, Fut>(handle: &DeadlineHandle, fut: Fut) -> DeadlineOutcome<T>
where
    Fut: Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        let deadline = handle.current().await;
        tokio::select! {
            biased;
            output = &mut fut => return DeadlineOutcome::Completed(output),
            _ = tokio::time::sleep_until(deadline.instant().into()) => {
                if handle.current().await.has_elapsed() {
                    return DeadlineOutcome::TimedOut;
                }
                // Deadline was extended while we were sleeping; loop and
                // wait on the new one without losing `fut`'s progress.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_before_deadline() {
        let handle = DeadlineHandle::new(Deadline::after(Duration::from_millis(200)));
        let outcome = run(&handle, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        })
        .await;
        assert!(matches!(outcome, DeadlineOutcome::Completed(42)));
    }

    #[tokio::test]
    async fn times_out_when_future_is_too_slow() {
        let handle = DeadlineHandle::new(Deadline::after(Duration::from_millis(10)));
        let outcome: DeadlineOutcome<()> = run(&handle, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await;
        assert!(matches!(outcome, DeadlineOutcome::TimedOut));
    }

    #[tokio::test]
    async fn extending_deadline_gives_future_more_time() {
        let handle = DeadlineHandle::new(Deadline::after(Duration::from_millis(20)));
        let extend_handle = handle.clone();
        let outcome = tokio::join!(
            run(&handle, async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                "done"
            }),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                extend_handle.extend(Duration::from_millis(200)).await;
            }
        )
        .0;
        assert!(matches!(outcome, DeadlineOutcome::Completed("done")));
    }
}
