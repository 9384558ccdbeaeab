// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire-format data structures shared between the loomtest runner and
//! anything that consumes its JSON report: CI systems, the `loomtest`
//! binary's own `json` reporter, and third-party tooling.
//!
//! This crate intentionally has no dependency on `loomtest-runner` — it is
//! a pure data definition, mirroring the relationship between
//! `nextest-metadata` and `nextest-runner`.

pub mod exit_codes;
mod schema;

pub use schema::{
    Annotation, AttemptStatus, ExpectedStatus, Report, ReportResult, ReportRunError, ReportSpec,
    ReportSuite, ReportTest, RunEndStatus, TestError,
};
