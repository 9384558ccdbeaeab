// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report aggregation (C7, spec.md §4.7): turns a finished run into one or
//! more reporter outputs (`dot`, `line`, `list`, `json`, `junit`).

pub mod aggregator;
mod dot;
mod events;
mod json;
mod junit;
mod line;
mod list;

pub use aggregator::{build_report, emit_events};
pub use dot::DotReporter;
pub use events::{Reporter, RunEvent};
pub use json::JsonReporter;
pub use junit::JunitReporter;
pub use line::LineReporter;
pub use list::ListReporter;

/// The set of reporter kinds selectable via `--reporter` (spec.md §6.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReporterKind {
    Dot,
    Line,
    List,
    Json,
    Junit,
}

impl std::str::FromStr for ReporterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dot" => Ok(Self::Dot),
            "line" => Ok(Self::Line),
            "list" => Ok(Self::List),
            "json" => Ok(Self::Json),
            "junit" => Ok(Self::Junit),
            other => Err(format!("unknown reporter `{other}` (expected one of dot, line, list, json, junit)")),
        }
    }
}

/// Dispatches a completed run to every configured reporter, then writes a
/// final newline-separated summary to `stderr` the way nextest's CLI does.
pub fn report_all(
    reporters: &[std::sync::Arc<dyn Reporter>],
    tests: &[crate::test_tree::Test],
    status: loomtest_metadata::RunEndStatus,
) {
    for reporter in reporters {
        emit_events(tests, status, reporter.as_ref());
    }
}
