//! A single-host connection: one TCP socket to one Cassandra node,
//! multiplexing concurrent requests over stream ids.
//!
//! [`Connection`] is a cheap cloneable handle. All socket and state handling
//! lives in a single owner task; the handle submits work over a queue and
//! waits for replies, so callers never contend on locks.

mod handshake;
mod streams;
mod worker;

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::instrument;
use uuid::Uuid;

use crate::constant::DEFAULT_CALL_TIMEOUT;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::request::Request;
use crate::protocol::response::{Prepared, ResponseBody, Row, RowsMetadata, SchemaChange};

pub(crate) use streams::{Slot, StreamTable};

/// Process-unique identity of one connection, carried in session
/// notifications so an external session can tell its connections apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Token returned by [`Connection::send_async`], echoed back with the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Correlation(u64);

impl Correlation {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A successful reply
#[derive(Debug)]
pub enum Value {
    /// Result.Void: statement executed, nothing to return
    Done,
    /// Server answered Ready
    Ready,
    Rows(RowSet),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
    /// Any body without dedicated handling (e.g. Supported)
    Other(ResponseBody),
}

/// Rows reply: a single complete page, or a stream fed page by page
#[derive(Debug)]
pub struct RowSet {
    pub metadata: RowsMetadata,
    /// Cleared when the rows arrive as a stream
    pub row_count: Option<i32>,
    pub rows: RowSource,
}

#[derive(Debug)]
pub enum RowSource {
    Page(Vec<Row>),
    Stream(RowStream),
}

/// Rows pushed by the connection as successive pages decode
///
/// Yields rows in wire order across page boundaries and ends after the page
/// without a continuation token. If the connection drops mid-stream, one
/// final `Err(Closed)` is yielded.
#[derive(Debug)]
pub struct RowStream {
    rx: mpsc::UnboundedReceiver<Result<Row>>,
}

impl RowStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<Row>>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<Row>> {
        self.rx.recv().await
    }

    /// Drain the stream into a vector, failing on the first error
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

/// Reply delivered to a [`Connection::send_async`] sink
#[derive(Debug)]
pub struct AsyncReply {
    pub correlation: Correlation,
    pub result: Result<Value>,
}

/// Where a pending request's reply goes
pub(crate) enum Waiter {
    /// Caller blocked in `send`
    Sync(oneshot::Sender<Result<Value>>),
    /// Fire-and-forget; reply goes to the caller's sink with its correlation
    Async {
        correlation: Correlation,
        sink: mpsc::UnboundedSender<AsyncReply>,
    },
    /// Continuation of a paged result; rows go straight into the stream
    Paging(mpsc::UnboundedSender<Result<Row>>),
}

impl Waiter {
    /// Deliver a terminal reply. Send failures are ignored: the caller may
    /// have timed out or dropped its end, and a late reply is then discarded.
    pub(crate) fn reply(self, result: Result<Value>) {
        match self {
            Waiter::Sync(tx) => {
                let _ = tx.send(result);
            }
            Waiter::Async { correlation, sink } => {
                let _ = sink.send(AsyncReply {
                    correlation,
                    result,
                });
            }
            Waiter::Paging(sink) => {
                // A paging waiter has no reply slot; only failures are worth
                // propagating into the stream. Dropping the sender closes it.
                if let Err(error) = result {
                    let _ = sink.send(Err(error));
                }
            }
        }
    }
}

/// Lifecycle notification for an external session
#[derive(Debug)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub host_id: Uuid,
    pub connection: ConnectionId,
}

#[derive(Debug)]
pub enum SessionEventKind {
    /// Handshake succeeded; the connection serves requests
    Opened,
    /// The socket dropped; the connection is reconnecting
    Closed,
    /// The connection shut down for good
    Stopped,
    /// A PREPARE round-trip completed
    Prepared { hash: [u8; 16], prepared: Prepared },
}

pub(crate) enum Command {
    Request { request: Request, waiter: Waiter },
    Stop { ack: oneshot::Sender<()> },
}

/// Handle to a single-host Cassandra connection
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Command>,
}

impl Connection {
    /// Open a connection per `opts`
    ///
    /// With `async_init` (the default) the handle returns immediately and
    /// connecting happens in the background, retried per the reconnection
    /// policy. With `async_init = false` the first connect and handshake run
    /// inline and their failure is returned here; no socket remains in that
    /// case.
    #[instrument(skip_all, fields(host = %opts.host, port = opts.port))]
    pub async fn connect(opts: Opts) -> Result<Self> {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        if opts.async_init {
            worker::spawn(id, opts, rx, None);
        } else {
            let ready = handshake::establish(&opts).await?;
            worker::spawn(id, opts, rx, Some(ready));
        }
        Ok(Self { id, tx })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Submit a request and wait for its single reply, up to the default
    /// call timeout
    pub async fn send(&self, request: Request) -> Result<Value> {
        self.send_with_timeout(request, Some(DEFAULT_CALL_TIMEOUT))
            .await
    }

    /// Submit a request and wait for its single reply
    ///
    /// The timeout bounds only this caller's wait: an expired wait leaves
    /// the request in flight and its eventual reply is discarded.
    pub async fn send_with_timeout(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Request {
            request,
            waiter: Waiter::Sync(reply_tx),
        };
        if self.tx.send(command).is_err() {
            return Err(Error::Closed);
        }
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
                Ok(reply) => reply.unwrap_or(Err(Error::Closed)),
                Err(_) => Err(Error::Timeout),
            },
            None => reply_rx.await.unwrap_or(Err(Error::Closed)),
        }
    }

    /// Submit a request without waiting; the reply arrives on `sink` tagged
    /// with the returned correlation token
    pub fn send_async(
        &self,
        request: Request,
        sink: mpsc::UnboundedSender<AsyncReply>,
    ) -> Correlation {
        let correlation = Correlation::next();
        let command = Command::Request {
            request,
            waiter: Waiter::Async {
                correlation,
                sink: sink.clone(),
            },
        };
        if self.tx.send(command).is_err() {
            let _ = sink.send(AsyncReply {
                correlation,
                result: Err(Error::Closed),
            });
        }
        correlation
    }

    /// Orderly shutdown: every pending waiter is woken with `Closed`, the
    /// session sink is notified, the socket is closed
    ///
    /// Dropping the last handle has the same effect.
    pub async fn stop(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Stop { ack: ack_tx }).is_ok() {
            let _ = ack_rx.await;
        }
    }
}
