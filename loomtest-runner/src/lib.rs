// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The core scheduler and worker-pool execution engine for loomtest.
//!
//! Mirrors the shape of `nextest-runner`: this crate owns everything from
//! the fixture registry down to report aggregation, and is driven by a
//! thin CLI binary (`loomtest-cli`) that owns argument parsing, process
//! re-exec, and stdout.

pub mod config;
pub mod deadline;
pub mod errors;
pub mod fixture;
pub mod ipc;
pub mod loader;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod test_tree;
pub mod time;
pub mod worker;

pub use config::FileConfig;
pub use errors::{ConfigParseError, DispatchError, FixtureError, TestError, TreeBuildError};
pub use fixture::{FixtureContext, FixtureDef, FixtureHash, FixtureRegistry, FixtureScope, OutputSink, Scope};
pub use loader::{LoadError, LoadResult, Loader, StaticLoader, TestBody};
pub use runner::{process_spawner, RunOutcome, SpawnWorker};
pub use signal::{SignalHandler, SignalHandlerKind};
pub use test_tree::{Project, RunConfig, Shard, Suite, Test, TestResult};
