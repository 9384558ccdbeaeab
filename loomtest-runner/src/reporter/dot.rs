// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `dot` reporter: one character per test, `.`/`F`/`T`/`s`/`f`.

use super::events::{Reporter, RunEvent};
use crate::test_tree::FinalStatus;
use std::io::Write;
use std::sync::Mutex;

pub struct DotReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl DotReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl Reporter for DotReporter {
    fn on_event(&self, event: &RunEvent<'_>) {
        let RunEvent::TestEnd { test } = event else {
            if let RunEvent::RunEnd { .. } = event {
                let mut out = self.out.lock().expect("reporter mutex poisoned");
                let _ = writeln!(out);
            }
            return;
        };
        let symbol = match test.final_status() {
            Some(FinalStatus::Passed) => '.',
            Some(FinalStatus::Flaky) => 'f',
            Some(FinalStatus::Failed) => 'F',
            Some(FinalStatus::TimedOut) => 'T',
            Some(FinalStatus::Skipped) | None => 's',
        };
        let mut out = self.out.lock().expect("reporter mutex poisoned");
        let _ = write!(out, "{symbol}");
    }
}
