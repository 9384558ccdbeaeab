// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error taxonomy from spec.md §7.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur while building the fixture registry or resolving
/// fixtures for a test (spec.md §4.1, §7).
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture `{0}` is already registered")]
    DuplicateFixture(String),

    #[error("worker-scoped fixture `{worker}` depends on test-scoped fixture `{dep}`")]
    InvalidScope { worker: String, dep: String },

    #[error("cyclic fixture dependency detected: {0}")]
    CyclicFixture(String),

    #[error("fixture `{0}` was never registered")]
    UnknownFixture(String),

    #[error("fixture `{fixture}` setup failed before publishing a value")]
    SetupFailed {
        fixture: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Fatal errors raised while building the test tree (spec.md §4.2, §7).
#[derive(Debug, Error)]
pub enum TreeBuildError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error("--forbid-only set and at least one test is marked `only`")]
    ForbiddenOnly,

    #[error("failed to load `{file}`")]
    Loader {
        file: Utf8PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors surfaced while parsing configuration (fatal at startup, exit 3).
#[derive(Debug, Error)]
#[error("failed to parse loomtest config at `{config_file}`")]
pub struct ConfigParseError {
    pub config_file: Utf8PathBuf,
    #[source]
    pub source: config::ConfigError,
}

/// The taxonomy of a single test's terminal error (spec.md §7).
#[derive(Debug, Error, Clone)]
pub enum TestError {
    /// Thrown from the test body or a fixture body.
    #[error("{message}")]
    User { message: String, stack: Option<String> },

    /// The deadline runner fired before the test body completed.
    #[error("test timed out")]
    Timeout,

    /// The worker exited before emitting `testEnd` for this test.
    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    /// This test's worker-hash doesn't match the hash the worker was
    /// `Init`-ed with; the dispatcher must never have sent it here.
    #[error("worker is bound to fixture hash {bound}, but this test requires {expected}")]
    HashMismatch { bound: String, expected: String },
}

impl TestError {
    pub fn user(message: impl Into<String>) -> Self {
        TestError::User {
            message: message.into(),
            stack: None,
        }
    }
}

/// Dispatcher-internal errors. These are fatal (exit 3): they indicate a bug
/// or an unrecoverable environment failure, never a test outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    TreeBuild(#[from] TreeBuildError),

    #[error("failed to spawn worker process: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("IPC with worker {worker_index} failed: {source}")]
    Ipc {
        worker_index: usize,
        #[source]
        source: std::io::Error,
    },
}
