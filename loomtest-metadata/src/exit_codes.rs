// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process exit codes returned by the `loomtest` binary.
//!
//! These are part of the stable contract between loomtest and CI systems
//! that inspect its exit status, so the numbering must never change.

/// All tests passed (or were flaky within their retry budget).
pub const NO_TESTS_FAILED_EXIT_CODE: i32 = 0;

/// At least one test failed or timed out after exhausting its retries.
pub const TESTS_FAILED_EXIT_CODE: i32 = 1;

/// The run was interrupted (`SIGINT` or equivalent) before completion.
pub const RUN_INTERRUPTED_EXIT_CODE: i32 = 2;

/// The run never started: configuration, tree-build, or CLI-argument error.
pub const CONFIG_ERROR_EXIT_CODE: i32 = 3;
