// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracing setup for the CLI binary, mirroring `cargo-nextest`'s use of
//! `tracing-subscriber` with an `RUST_LOG`-driven `EnvFilter`.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber writing to stderr, controlled by
/// `RUST_LOG` (default: `warn`, so test output on stdout stays readable).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
