// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `json` reporter: writes the full [`Report`](loomtest_metadata::Report)
//! once the run ends (spec.md §6.3).

use super::aggregator::build_report;
use super::events::{Reporter, RunEvent};
use crate::test_tree::Test;
use loomtest_metadata::ReportRunError;
use std::io::Write;
use std::sync::Mutex;

pub struct JsonReporter {
    out: Mutex<Box<dyn Write + Send>>,
    config: serde_json::Value,
    run_errors: Vec<ReportRunError>,
    tests: Mutex<Vec<Test>>,
}

impl JsonReporter {
    pub fn new(out: Box<dyn Write + Send>, config: serde_json::Value, run_errors: Vec<ReportRunError>) -> Self {
        Self {
            out: Mutex::new(out),
            config,
            run_errors,
            tests: Mutex::new(Vec::new()),
        }
    }
}

impl Reporter for JsonReporter {
    fn on_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::TestEnd { test } => {
                self.tests.lock().expect("reporter mutex poisoned").push((*test).clone());
            }
            RunEvent::RunEnd { .. } => {
                let tests = self.tests.lock().expect("reporter mutex poisoned");
                let report = build_report(&tests, self.config.clone(), self.run_errors.clone());
                let mut out = self.out.lock().expect("reporter mutex poisoned");
                if let Err(error) = serde_json::to_writer_pretty(&mut *out, &report) {
                    tracing::error!(%error, "failed to write JSON report");
                }
            }
            _ => {}
        }
    }
}
