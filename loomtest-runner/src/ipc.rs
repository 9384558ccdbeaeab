// Copyright (c) The loomtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parent/worker IPC (C6, spec.md §4.6, §6.4).
//!
//! Messages are framed as a little-endian `u32` byte length followed by a
//! JSON payload, written to the worker's stdin and read from its stdout.
//! This is deliberately distinct from the test's own stdout/stderr, which
//! the worker captures separately and forwards as `stdio` events rather
//! than mixing it into the same stream as control messages.

use loomtest_metadata::{Annotation, AttemptStatus, TestError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Messages sent from the dispatcher to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ParentToWorker {
    /// First message sent to a freshly spawned worker: the worker-scope
    /// fixture hash it must serve, used to detect a mismatched re-use.
    Init { fixture_hash: String },
    /// Run one test, identified by its planning id.
    Run {
        test_id: u64,
        fixture_refs: Vec<String>,
        timeout: Duration,
    },
    /// Ask the worker to tear down its worker-scope fixtures and exit.
    Stop,
}

/// Messages sent from a worker back to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerToParent {
    /// The worker has received `Init` and is ready to accept `Run`.
    Ready,
    /// A test has started executing.
    TestBegin { test_id: u64 },
    /// A chunk of the test's captured stdout/stderr.
    Stdio { test_id: u64, stream: StdioStream, chunk: String },
    /// A test finished (pass, fail, or timeout).
    TestEnd {
        test_id: u64,
        status: AttemptStatus,
        duration: Duration,
        error: Option<TestError>,
        annotations: Vec<Annotation>,
    },
    /// A worker-scope fixture's teardown failed after the worker already
    /// accepted its next `Run`; attributed to the test named here rather
    /// than treated as a run-level error (spec.md §9).
    TeardownError { test_id: u64, error: TestError },
    /// The worker is exiting. `pending_worker` is set when it still owed a
    /// result for an in-flight test (crash mid-test).
    Done { pending_worker: bool },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum StdioStream {
    Stdout,
    Stderr,
}

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let payload = serde_json::to_vec(message).map_err(std::io::Error::other)?;
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Reads one length-prefixed JSON frame, or `Ok(None)` at a clean EOF
/// between frames (the worker exited after its last message).
pub async fn read_frame<R, M>(reader: &mut R) -> std::io::Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: for<'de> Deserialize<'de>,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let message = serde_json::from_slice(&buf).map_err(std::io::Error::other)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &WorkerToParent::Ready).await.unwrap();
        write_frame(
            &mut buf,
            &WorkerToParent::TestBegin { test_id: 7 },
        )
        .await
        .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let first: WorkerToParent = read_frame(&mut cursor).await.unwrap().unwrap();
        let second: WorkerToParent = read_frame(&mut cursor).await.unwrap().unwrap();
        assert!(matches!(first, WorkerToParent::Ready));
        assert!(matches!(second, WorkerToParent::TestBegin { test_id: 7 }));

        let eof: Option<WorkerToParent> = read_frame(&mut cursor).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn parent_to_worker_frames_round_trip() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            &ParentToWorker::Run {
                test_id: 1,
                fixture_refs: vec!["db".to_owned()],
                timeout: Duration::from_secs(30),
            },
        )
        .await
        .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let message: ParentToWorker = read_frame(&mut cursor).await.unwrap().unwrap();
        match message {
            ParentToWorker::Run { test_id, fixture_refs, .. } => {
                assert_eq!(test_id, 1);
                assert_eq!(fixture_refs, vec!["db".to_owned()]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
