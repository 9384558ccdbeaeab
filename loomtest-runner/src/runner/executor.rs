// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A running worker process and the function used to spawn one.
//!
//! The dispatcher is generic over how a worker process actually comes into
//! being: production code spawns the current executable re-invoked as
//! `__loomtest-worker` (`loomtest-cli::worker_main`), tests substitute an
//! in-process stand-in. Mirrors the separation nextest draws between its
//! scheduler and its `double_spawn` process-spawning helper.

use crate::fixture::FixtureHash;
use crate::ipc::{read_frame, write_frame, ParentToWorker, WorkerToParent};
use futures::future::BoxFuture;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A live worker the dispatcher can send `Run`/`Stop` to.
pub struct WorkerProcess {
    pub worker_index: usize,
    pub bound_hash: FixtureHash,
    child: Box<dyn WorkerChannel>,
}

/// The async read/write halves of a worker's control channel, erased so
/// both a real child process and an in-memory test double implement it.
pub trait WorkerChannel: Send {
    fn write_half(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin);
    fn read_half(&mut self) -> &mut (dyn AsyncRead + Send + Unpin);
    /// Best-effort termination; called when the dispatcher gives up on a
    /// worker that stopped answering (crash, stuck IPC).
    fn kill<'a>(&'a mut self) -> BoxFuture<'a, io::Result<()>>;
}

impl WorkerProcess {
    pub fn new(worker_index: usize, bound_hash: FixtureHash, child: Box<dyn WorkerChannel>) -> Self {
        Self {
            worker_index,
            bound_hash,
            child,
        }
    }

    pub async fn send(&mut self, message: &ParentToWorker) -> io::Result<()> {
        write_frame(self.child.write_half(), message).await
    }

    pub async fn recv(&mut self) -> io::Result<Option<WorkerToParent>> {
        read_frame(self.child.read_half()).await
    }

    pub async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

/// Spawns a fresh worker process bound to serve tests requiring
/// `fixture_hash`, sends it `Init`, and waits for `Ready`.
pub type SpawnWorker = Arc<
    dyn Fn(usize, FixtureHash) -> BoxFuture<'static, io::Result<WorkerProcess>> + Send + Sync,
>;

/// Builds a [`SpawnWorker`] that launches `exe` re-invoked with the hidden
/// worker subcommand, wiring its stdin/stdout as the IPC channel and
/// letting its stderr pass through to the parent's (tracing logs included).
pub fn process_spawner(exe: std::path::PathBuf, worker_subcommand: &'static str) -> SpawnWorker {
    Arc::new(move |worker_index, fixture_hash| {
        let exe = exe.clone();
        Box::pin(async move {
            let mut command = tokio::process::Command::new(&exe);
            command
                .arg(worker_subcommand)
                .arg("--worker-index")
                .arg(worker_index.to_string())
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::inherit());

            let mut child = command.spawn()?;
            let stdin = child.stdin.take().expect("piped stdin");
            let stdout = child.stdout.take().expect("piped stdout");
            let mut worker = WorkerProcess::new(
                worker_index,
                fixture_hash,
                Box::new(ChildWorkerChannel { child, stdin, stdout }),
            );
            worker
                .send(&ParentToWorker::Init {
                    fixture_hash: fixture_hash.to_string(),
                })
                .await?;
            match worker.recv().await? {
                Some(WorkerToParent::Ready) => Ok(worker),
                other => Err(io::Error::other(format!(
                    "worker {worker_index} sent {other:?} instead of Ready"
                ))),
            }
        })
    })
}

struct ChildWorkerChannel {
    child: tokio::process::Child,
    stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
}

impl WorkerChannel for ChildWorkerChannel {
    fn write_half(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.stdin
    }

    fn read_half(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut self.stdout
    }

    fn kill<'a>(&'a mut self) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move { self.child.kill().await })
    }
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use crate::worker::{self, WorkerContext};
    use tokio::io::DuplexStream;

    /// An in-process worker: runs the real [`worker::run`] loop against an
    /// in-memory duplex pipe instead of a child process, so dispatcher
    /// tests exercise the real protocol without spawning anything.
    pub fn in_process_spawner(make_context: Arc<dyn Fn(usize) -> WorkerContext + Send + Sync>) -> SpawnWorker {
        Arc::new(move |worker_index, fixture_hash| {
            let make_context = make_context.clone();
            Box::pin(async move {
                let (parent_side, worker_side) = tokio::io::duplex(64 * 1024);
                let (worker_read, worker_write) = tokio::io::split(worker_side);
                let ctx = make_context(worker_index);
                tokio::spawn(async move {
                    if let Err(err) = worker::run(ctx, worker_read, worker_write).await {
                        tracing::error!(%err, "in-process test worker exited with an IO error");
                    }
                });

                let (parent_read, parent_write) = tokio::io::split(parent_side);
                let mut worker_proc = WorkerProcess::new(
                    worker_index,
                    fixture_hash,
                    Box::new(DuplexWorkerChannel {
                        read: parent_read,
                        write: parent_write,
                    }),
                );
                worker_proc
                    .send(&ParentToWorker::Init {
                        fixture_hash: fixture_hash.to_string(),
                    })
                    .await?;
                match worker_proc.recv().await? {
                    Some(WorkerToParent::Ready) => Ok(worker_proc),
                    other => Err(io::Error::other(format!("expected Ready, got {other:?}"))),
                }
            })
        })
    }

    struct DuplexWorkerChannel {
        read: tokio::io::ReadHalf<DuplexStream>,
        write: tokio::io::WriteHalf<DuplexStream>,
    }

    impl WorkerChannel for DuplexWorkerChannel {
        fn write_half(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
            &mut self.write
        }

        fn read_half(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
            &mut self.read
        }

        fn kill<'a>(&'a mut self) -> BoxFuture<'a, io::Result<()>> {
            Box::pin(async move { Ok(()) })
        }
    }
}
