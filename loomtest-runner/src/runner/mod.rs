// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scheduler and worker-pool execution engine (C5, spec.md §4.5).

mod dispatcher;
pub mod executor;

pub use dispatcher::{run, RunOutcome};
pub use executor::{process_spawner, SpawnWorker, WorkerChannel, WorkerProcess};
