// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SIGINT handling, used to drain an in-progress run gracefully rather
//! than abort it outright (spec.md §4.5).

/// The kind of signal handling to install for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalHandlerKind {
    /// Listen for Ctrl-C and flip the run's interrupted flag.
    Standard,
    /// Never signals; used in tests so they aren't at the mercy of the
    /// test harness's own signal handling.
    Noop,
}

impl SignalHandlerKind {
    pub fn build(self) -> SignalHandler {
        SignalHandler { kind: self }
    }
}

pub struct SignalHandler {
    kind: SignalHandlerKind,
}

impl SignalHandler {
    /// Resolves once Ctrl-C is received (`Standard`), or never (`Noop`).
    pub async fn recv(&mut self) {
        match self.kind {
            SignalHandlerKind::Standard => {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::error!(%error, "failed to install Ctrl-C handler");
                    std::future::pending::<()>().await;
                }
            }
            SignalHandlerKind::Noop => std::future::pending::<()>().await,
        }
    }
}
