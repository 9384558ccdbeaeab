// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `line` reporter: one line per test, rewritten in place while the
//! run is live; here (batch replay) simply one line per completed test.

use super::events::{Reporter, RunEvent};
use crate::test_tree::FinalStatus;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct LineReporter {
    out: Mutex<Box<dyn Write + Send>>,
    total: AtomicUsize,
    done: AtomicUsize,
}

impl LineReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }
}

impl Reporter for LineReporter {
    fn on_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::RunBegin { total } => {
                self.total.store(*total, Ordering::Relaxed);
            }
            RunEvent::TestEnd { test } => {
                let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
                let total = self.total.load(Ordering::Relaxed);
                let status = match test.final_status() {
                    Some(FinalStatus::Passed) => "pass",
                    Some(FinalStatus::Flaky) => "flaky",
                    Some(FinalStatus::Failed) => "fail",
                    Some(FinalStatus::TimedOut) => "timeout",
                    Some(FinalStatus::Skipped) | None => "skip",
                };
                let mut out = self.out.lock().expect("reporter mutex poisoned");
                let _ = writeln!(out, "[{done}/{total}] {status} {}", test.full_title());
            }
            _ => {}
        }
    }
}
