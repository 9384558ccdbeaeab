// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `list` reporter: a full test list with a trailing status, the way
//! `jest --verbose` or nextest's `list` reporter prints.

use super::events::{Reporter, RunEvent};
use crate::test_tree::FinalStatus;
use std::io::Write;
use std::sync::Mutex;

pub struct ListReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ListReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl Reporter for ListReporter {
    fn on_event(&self, event: &RunEvent<'_>) {
        let RunEvent::TestEnd { test } = event else { return };
        let status = match test.final_status() {
            Some(FinalStatus::Passed) => "PASS",
            Some(FinalStatus::Flaky) => "FLAKY",
            Some(FinalStatus::Failed) => "FAIL",
            Some(FinalStatus::TimedOut) => "TIMEOUT",
            Some(FinalStatus::Skipped) | None => "SKIP",
        };
        let mut out = self.out.lock().expect("reporter mutex poisoned");
        let _ = writeln!(out, "{status:>8}  {} [{}]", test.full_title(), test.project);
    }
}
