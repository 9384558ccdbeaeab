// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monotonic timing helpers shared by the dispatcher, executor, and worker.
//!
//! A combination of `SystemTime`/`DateTime` (wall clock, for reporting) and
//! `Instant` (monotonic clock, for deadlines and durations) is used, the
//! same split as `nextest-runner::time::stopwatch`.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// Tracks the wall-clock start time and monotonic elapsed time of a run or
/// test attempt.
#[derive(Clone, Debug)]
pub struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub fn start_instant(&self) -> Instant {
        self.instant
    }

    pub fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            elapsed: self.instant.elapsed(),
        }
    }
}

/// A point-in-time snapshot taken from a [`StopwatchStart`].
#[derive(Clone, Copy, Debug)]
pub struct StopwatchSnapshot {
    pub start_time: DateTime<Local>,
    pub elapsed: Duration,
}

/// An absolute, monotonic deadline. Cheap to copy; compared with
/// `Instant::now()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Deadline(Instant::now() + duration)
    }

    /// A deadline that effectively never elapses (used for `timeout = 0`).
    pub fn never() -> Self {
        Deadline(Instant::now() + Duration::from_secs(365 * 24 * 60 * 60))
    }

    pub fn instant(self) -> Instant {
        self.0
    }

    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(self) -> bool {
        Instant::now() >= self.0
    }
}
