// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The reporter-facing event stream (spec.md §4.7).

use crate::test_tree::Test;
use loomtest_metadata::RunEndStatus;

/// One step of a run, as seen by a [`super::Reporter`].
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    RunBegin { total: usize },
    TestBegin { test: &'a Test },
    TestEnd { test: &'a Test },
    RunEnd { status: RunEndStatus },
}

/// Receives [`RunEvent`]s as the run progresses. Implementations must not
/// block: reporters that do I/O (writing to stdout, a file) should do so
/// synchronously but cheaply, the way nextest's `displayer` reporters do.
pub trait Reporter: Send + Sync {
    fn on_event(&self, event: &RunEvent<'_>);
}
