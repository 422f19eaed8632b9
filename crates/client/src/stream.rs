//! Streaming reader for scan and query results
//!
//! Every node streams its records over one connection. A reader task reads
//! one frame, hands its records to a bounded channel and only then reads
//! the next frame, so a slow consumer stalls the server stream instead of
//! buffering it. [`RecordStream::abort`] cancels the readers between frames
//! and ends the stream without an error.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use aerie_cluster::{Connection, Node};
use aerie_core::{BasePolicy, Error, Record, Result};
use aerie_wire::proto::ProtoType;
use aerie_wire::response::{decode_stream, is_stream_end};

/// Terminal state of a [`RecordStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Records may still arrive
    Streaming,
    /// Every node finished
    Ended,
    /// Cancelled by the caller
    Aborted,
    /// A node failed; the error was yielded
    Failed,
}

/// Settings for one streamed request.
#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub base: BasePolicy,
    pub queue_size: usize,
    pub concurrent: bool,
    pub conn_timeout: Duration,
}

/// Records of a scan or query, in arrival order.
///
/// Implements [`Stream`] with `Item = Result<Record>`. After an error the
/// stream yields nothing more.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<Result<Record>>,
    cancel: CancellationToken,
    state: StreamState,
}

impl RecordStream {
    /// Start reading `request` from every node.
    pub(crate) fn spawn(nodes: Vec<Arc<Node>>, request: Bytes, settings: StreamSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
        let cancel = CancellationToken::new();
        let settings = Arc::new(settings);
        if settings.concurrent {
            for node in nodes {
                let reader = NodeReader {
                    node,
                    request: request.clone(),
                    settings: Arc::clone(&settings),
                    tx: tx.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(reader.run());
            }
        } else {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for node in nodes {
                    let reader = NodeReader {
                        node,
                        request: request.clone(),
                        settings: Arc::clone(&settings),
                        tx: tx.clone(),
                        cancel: cancel.clone(),
                    };
                    if !reader.run().await {
                        break;
                    }
                }
            });
        }
        RecordStream {
            rx,
            cancel,
            state: StreamState::Streaming,
        }
    }

    /// Stop reading. Buffered records are discarded and the stream ends
    /// without an error.
    pub fn abort(&mut self) {
        if self.state == StreamState::Streaming {
            self.state = StreamState::Aborted;
        }
        self.cancel.cancel();
        self.rx.close();
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }
}

impl Stream for RecordStream {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.state != StreamState::Streaming {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(record))) => Poll::Ready(Some(Ok(record))),
            Poll::Ready(Some(Err(e))) => {
                self.state = StreamState::Failed;
                self.cancel.cancel();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.state = if self.cancel.is_cancelled() {
                    StreamState::Aborted
                } else {
                    StreamState::Ended
                };
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    End,
    Aborted,
}

struct NodeReader {
    node: Arc<Node>,
    request: Bytes,
    settings: Arc<StreamSettings>,
    tx: mpsc::Sender<Result<Record>>,
    cancel: CancellationToken,
}

impl NodeReader {
    /// Stream one node. Returns false when the whole stream should stop.
    async fn run(self) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut delivered = 0usize;
            match self.read(&mut delivered).await {
                Ok(Completion::End) => {
                    debug!(
                        target: "aerie::stream",
                        node = %self.node.name(),
                        records = delivered,
                        "Node stream finished"
                    );
                    return true;
                }
                Ok(Completion::Aborted) => return false,
                // records already handed out cannot be replayed
                Err(e)
                    if e.is_retryable()
                        && delivered == 0
                        && attempt <= self.settings.base.max_retries =>
                {
                    debug!(
                        target: "aerie::stream",
                        node = %self.node.name(),
                        attempt,
                        error = %e,
                        "Retrying node stream"
                    );
                }
                Err(e) => {
                    if !self.cancel.is_cancelled() {
                        warn!(
                            target: "aerie::stream",
                            node = %self.node.name(),
                            error = %e,
                            "Node stream failed"
                        );
                        let _ = self.tx.send(Err(e)).await;
                    }
                    return false;
                }
            }
        }
    }

    async fn read(&self, delivered: &mut usize) -> Result<Completion> {
        let base = &self.settings.base;
        let wait = base.timeout().unwrap_or(self.settings.conn_timeout);
        let mut conn = self.node.pool().acquire(base.conn_acquire, wait).await?;
        let res = self.pump(&mut conn, delivered).await;
        // an aborted stream leaves unread frames on the socket
        conn.release(matches!(res, Ok(Completion::End)));
        res
    }

    async fn pump(&self, conn: &mut Connection, delivered: &mut usize) -> Result<Completion> {
        conn.send(&self.request).await?;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Completion::Aborted);
            }
            let frame = match self.settings.base.timeout() {
                Some(t) => tokio::time::timeout(t, conn.read_frame())
                    .await
                    .map_err(|_| {
                        Error::timeout(format!("stream from {} timed out", self.node.name()))
                    })??,
                None => conn.read_frame().await?,
            };
            if frame.kind != ProtoType::Message {
                return Err(Error::protocol(format!(
                    "expected message frame, got {:?}",
                    frame.kind
                )));
            }
            for resp in decode_stream(&frame.payload)? {
                if resp.last {
                    let code = resp.result_code;
                    if code.is_ok() || is_stream_end(code) {
                        return Ok(Completion::End);
                    }
                    return Err(Error::from_code(code));
                }
                if !resp.result_code.is_ok() {
                    return Err(Error::from_code(resp.result_code));
                }
                let key = resp.key()?;
                let record = Record::new(key, resp.bins, resp.metadata);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(Completion::Aborted),
                    sent = self.tx.send(Ok(record)) => {
                        if sent.is_err() {
                            return Ok(Completion::Aborted);
                        }
                        *delivered += 1;
                    }
                }
            }
        }
    }
}
