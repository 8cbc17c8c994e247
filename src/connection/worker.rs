//! The owner task behind a [`Connection`](super::Connection) handle.
//!
//! Exactly one task owns the socket, the framing buffer, and the stream
//! table; every mutation happens between its suspension points, so callers
//! observe state transitions atomically. The task cycles through
//! establish → serve, draining all pending waiters whenever the socket is
//! lost, until stopped or the reconnection policy gives up.

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Decoder;
use tracing::{debug, error, instrument, warn};

use crate::connection::{
    Command, ConnectionId, RowSet, RowSource, RowStream, SessionEvent, SessionEventKind, Slot,
    StreamTable, Value, Waiter, handshake,
};
use crate::constant::{EVENT_STREAM_ID, HANDSHAKE_STREAM_ID, LOG_STREAM_ID};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frame::{Frame, FrameDecoder};
use crate::protocol::request::Request;
use crate::protocol::response::{CqlResult, Prepared, ResponseBody, Row, Rows};
use crate::reconnect::{Decision, ReconnectionPolicy};

/// Spawn the owner task. `ready` carries the socket of an inline (non-async)
/// init, with whatever the handshake left in the read buffer.
pub(crate) fn spawn(
    id: ConnectionId,
    opts: Opts,
    rx: mpsc::UnboundedReceiver<Command>,
    ready: Option<(TcpStream, BytesMut)>,
) {
    let reconnection = opts.reconnection.clone();
    let worker = Worker {
        id,
        opts,
        rx,
        buffer: BytesMut::new(),
        decoder: FrameDecoder,
        streams: StreamTable::new(),
        reconnection,
    };
    tokio::spawn(worker.run(ready));
}

struct Worker {
    id: ConnectionId,
    opts: Opts,
    rx: mpsc::UnboundedReceiver<Command>,
    /// Inbound bytes; holds at most one trailing partial frame
    buffer: BytesMut,
    decoder: FrameDecoder,
    streams: StreamTable,
    reconnection: Box<dyn ReconnectionPolicy>,
}

/// Why the serving loop ended
enum Exit {
    /// Socket failure; reconnect per policy
    Disconnect,
    /// Explicit stop, or every handle was dropped
    Stop { ack: Option<oneshot::Sender<()>> },
}

/// Outcome of the establish loop
enum Established {
    Connected(TcpStream),
    Stopped { ack: Option<oneshot::Sender<()>> },
    /// The policy said stop
    Exhausted,
}

/// Whether the connection can keep serving after an operation
#[derive(PartialEq)]
enum Control {
    Continue,
    Disconnect,
}

impl Worker {
    #[instrument(skip_all, fields(connection = %self.id))]
    async fn run(mut self, ready: Option<(TcpStream, BytesMut)>) {
        let mut socket = match ready {
            Some((socket, buffer)) => {
                self.buffer = buffer;
                self.reconnection.reset();
                self.notify_session(SessionEventKind::Opened);
                Some(socket)
            }
            None => None,
        };
        // Consult the policy before dialing only when recovering from a drop;
        // the initial attempt goes out immediately.
        let mut after_drop = false;

        loop {
            let mut stream = match socket.take() {
                Some(stream) => stream,
                None => match self.establish(after_drop).await {
                    Established::Connected(stream) => stream,
                    Established::Stopped { ack } => {
                        self.shutdown(None, ack).await;
                        return;
                    }
                    Established::Exhausted => {
                        error!("{}", Error::MaxAttempts);
                        return;
                    }
                },
            };

            match self.serve(&mut stream).await {
                Exit::Disconnect => {
                    drop(stream);
                    self.fail_all_pending();
                    self.notify_session(SessionEventKind::Closed);
                    after_drop = true;
                }
                Exit::Stop { ack } => {
                    self.shutdown(Some(stream), ack).await;
                    return;
                }
            }
        }
    }

    /// Dial and handshake until connected, sleeping out backoffs in between.
    /// Submissions arriving meanwhile are answered `NotConnected` right away.
    async fn establish(&mut self, mut consult_first: bool) -> Established {
        loop {
            if consult_first {
                match self.reconnection.next() {
                    Decision::Stop => return Established::Exhausted,
                    Decision::Backoff(backoff) => {
                        debug!(?backoff, "waiting before reconnect");
                        if let Some(stopped) = self.idle_wait(backoff).await {
                            return stopped;
                        }
                    }
                }
            }
            consult_first = true;

            let mut attempt = Box::pin(handshake::establish_owned(self.opts.clone()));
            let outcome = loop {
                tokio::select! {
                    outcome = &mut attempt => break outcome,
                    command = self.rx.recv() => match command {
                        None => return Established::Stopped { ack: None },
                        Some(Command::Stop { ack }) => {
                            return Established::Stopped { ack: Some(ack) };
                        }
                        Some(Command::Request { waiter, .. }) => {
                            waiter.reply(Err(Error::NotConnected));
                        }
                    },
                }
            };

            match outcome {
                Ok((stream, buffer)) => {
                    self.buffer = buffer;
                    self.reconnection.reset();
                    self.notify_session(SessionEventKind::Opened);
                    return Established::Connected(stream);
                }
                Err(error) => {
                    warn!(%error, "connection attempt failed");
                }
            }
        }
    }

    /// Sleep out a backoff while still answering the command queue
    async fn idle_wait(&mut self, backoff: core::time::Duration) -> Option<Established> {
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return None,
                command = self.rx.recv() => match command {
                    None => return Some(Established::Stopped { ack: None }),
                    Some(Command::Stop { ack }) => {
                        return Some(Established::Stopped { ack: Some(ack) });
                    }
                    Some(Command::Request { waiter, .. }) => {
                        waiter.reply(Err(Error::NotConnected));
                    }
                },
            }
        }
    }

    /// Multiplex submissions and inbound frames until the socket dies or the
    /// connection is stopped
    async fn serve(&mut self, stream: &mut TcpStream) -> Exit {
        // The handshake may have read past its own replies.
        if self.route_buffered(stream).await == Control::Disconnect {
            return Exit::Disconnect;
        }
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    None => return Exit::Stop { ack: None },
                    Some(Command::Stop { ack }) => return Exit::Stop { ack: Some(ack) },
                    Some(Command::Request { request, waiter }) => {
                        if self.dispatch(stream, request, waiter).await == Control::Disconnect {
                            return Exit::Disconnect;
                        }
                    }
                },
                read = stream.read_buf(&mut self.buffer) => match read {
                    Ok(0) => {
                        debug!("server closed the connection");
                        return Exit::Disconnect;
                    }
                    Ok(_) => {
                        if self.route_buffered(stream).await == Control::Disconnect {
                            return Exit::Disconnect;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "socket read failed");
                        return Exit::Disconnect;
                    }
                },
            }
        }
    }

    /// Assign a stream id, encode, transmit, and park the waiter
    ///
    /// Failures local to the request (no free id, codec rejection) answer
    /// only this waiter; transport failures poison the whole connection.
    async fn dispatch(
        &mut self,
        stream: &mut TcpStream,
        request: Request,
        waiter: Waiter,
    ) -> Control {
        let id = self.streams.next_id();
        if self.streams.occupied(id) {
            warn!(stream_id = id, "wrap-around hit a pending stream id");
            waiter.reply(Err(Error::Invalid));
            return Control::Continue;
        }

        let encoded = match request.encode(id as i16) {
            Ok(encoded) => encoded,
            Err(error) => {
                debug!(%error, "request rejected by the codec");
                waiter.reply(Err(Error::Invalid));
                return Control::Continue;
            }
        };

        match handshake::write_frame(stream, &encoded, self.opts.response_timeout).await {
            Ok(()) => {
                self.streams.register(id, Slot { request, waiter });
                Control::Continue
            }
            Err(Error::Timeout) => {
                warn!(stream_id = id, "send stalled past the transport limit");
                waiter.reply(Err(Error::Timeout));
                Control::Disconnect
            }
            Err(error) => {
                warn!(stream_id = id, %error, "socket write failed");
                waiter.reply(Err(error));
                Control::Disconnect
            }
        }
    }

    /// Pull every whole frame out of the buffer and route it; the trailing
    /// partial frame, if any, stays for the next read
    async fn route_buffered(&mut self, stream: &mut TcpStream) -> Control {
        loop {
            match self.decoder.decode(&mut self.buffer) {
                Ok(Some(frame)) => {
                    if self.route(stream, frame).await == Control::Disconnect {
                        return Control::Disconnect;
                    }
                }
                Ok(None) => return Control::Continue,
                Err(error) => {
                    warn!(%error, "inbound frame is corrupt");
                    return Control::Disconnect;
                }
            }
        }
    }

    /// Match one frame to its destination by stream id
    async fn route(&mut self, stream: &mut TcpStream, frame: Frame) -> Control {
        for warning in &frame.warnings {
            warn!(stream_id = frame.stream, %warning, "server warning");
        }

        match frame.stream {
            EVENT_STREAM_ID => {
                self.deliver_event(frame.body);
                Control::Continue
            }
            HANDSHAKE_STREAM_ID => Control::Continue,
            LOG_STREAM_ID => {
                match frame.body {
                    ResponseBody::Error { code, message } => {
                        error!(code, error = %message, "error frame on the reserved stream");
                    }
                    body => debug!(?body, "frame on the reserved stream"),
                }
                Control::Continue
            }
            id => {
                let Some(slot) = u16::try_from(id).ok().and_then(|id| self.streams.take(id))
                else {
                    error!(stream_id = id, "{}", Error::UnknownStream(id));
                    return Control::Disconnect;
                };
                self.deliver(stream, slot, frame.body).await
            }
        }
    }

    /// Turn a response body into the waiter's reply
    async fn deliver(&mut self, stream: &mut TcpStream, slot: Slot, body: ResponseBody) -> Control {
        match body {
            ResponseBody::Result(CqlResult::Rows(rows)) => {
                self.deliver_rows(stream, slot, rows).await
            }
            ResponseBody::Error { code, message } => {
                slot.waiter.reply(Err(Error::Server { code, message }));
                Control::Continue
            }
            ResponseBody::Ready => {
                slot.waiter.reply(Ok(Value::Ready));
                Control::Continue
            }
            ResponseBody::Result(CqlResult::Void) => {
                slot.waiter.reply(Ok(Value::Done));
                Control::Continue
            }
            ResponseBody::Result(CqlResult::SetKeyspace(name)) => {
                slot.waiter.reply(Ok(Value::SetKeyspace(name)));
                Control::Continue
            }
            ResponseBody::Result(CqlResult::Prepared(prepared)) => {
                self.notify_prepared(&slot.request, &prepared);
                slot.waiter.reply(Ok(Value::Prepared(prepared)));
                Control::Continue
            }
            ResponseBody::Result(CqlResult::SchemaChange(change)) => {
                slot.waiter.reply(Ok(Value::SchemaChange(change)));
                Control::Continue
            }
            body => {
                slot.waiter.reply(Ok(Value::Other(body)));
                Control::Continue
            }
        }
    }

    /// Rows routing: final pages complete the waiter or the stream; pages
    /// with a continuation token hand the caller a stream (if it does not
    /// have one yet) and re-dispatch the request for the next page
    async fn deliver_rows(&mut self, stream: &mut TcpStream, slot: Slot, rows: Rows) -> Control {
        let Rows {
            metadata,
            row_count,
            rows: page,
            paging_state,
        } = rows;

        match (paging_state, slot.waiter) {
            (None, Waiter::Paging(sink)) => {
                // Last page of a paged result: drain into the stream, then
                // closing the sender ends it.
                for row in page {
                    if sink.send(Ok(row)).is_err() {
                        break;
                    }
                }
                Control::Continue
            }
            (None, waiter) => {
                waiter.reply(Ok(Value::Rows(RowSet {
                    metadata,
                    row_count: Some(row_count),
                    rows: RowSource::Page(page),
                })));
                Control::Continue
            }
            (Some(token), Waiter::Paging(sink)) => {
                for row in page {
                    if sink.send(Ok(row)).is_err() {
                        break;
                    }
                }
                self.continue_paging(stream, slot.request, token, sink).await
            }
            (Some(token), waiter) => {
                // First page of a paged result: the caller gets a stream in
                // place of the rows, then the current page feeds it.
                let (sink, rx) = mpsc::unbounded_channel();
                waiter.reply(Ok(Value::Rows(RowSet {
                    metadata,
                    row_count: None,
                    rows: RowSource::Stream(RowStream::new(rx)),
                })));
                for row in page {
                    if sink.send(Ok(row)).is_err() {
                        break;
                    }
                }
                self.continue_paging(stream, slot.request, token, sink).await
            }
        }
    }

    /// Re-issue the original request with the continuation token, targeting
    /// the same row stream
    async fn continue_paging(
        &mut self,
        stream: &mut TcpStream,
        request: Request,
        token: Bytes,
        sink: mpsc::UnboundedSender<Result<Row>>,
    ) -> Control {
        match request.with_paging_state(token) {
            Some(next) => self.dispatch(stream, next, Waiter::Paging(sink)).await,
            None => {
                warn!("paged result for a request that cannot carry a paging state; ending the row stream");
                Control::Continue
            }
        }
    }

    fn deliver_event(&self, body: ResponseBody) {
        match body {
            ResponseBody::Event(event) => match &self.opts.events {
                Some(sink) => {
                    if sink.send(event).is_err() {
                        warn!("event sink is closed, dropping server event");
                    }
                }
                None => warn!("server event received but no event sink is configured"),
            },
            body => warn!(?body, "non-event frame on the event stream"),
        }
    }

    /// `{prepared, hash, value}` session notification; the hash identifies
    /// the request independently of the stream id it used
    fn notify_prepared(&self, request: &Request, prepared: &Prepared) {
        let encoded = match request.encode(HANDSHAKE_STREAM_ID) {
            Ok(encoded) => encoded,
            Err(error) => {
                // The same request already encoded once to reach the wire.
                error!(
                    "{}",
                    Error::LibraryBug(crate::error::eyre!(
                        "sent request failed to re-encode: {error}"
                    ))
                );
                return;
            }
        };
        let hash: [u8; 16] = Md5::digest(&encoded).into();
        self.notify_session(SessionEventKind::Prepared {
            hash,
            prepared: prepared.clone(),
        });
    }

    /// Wake every pending waiter with `Closed`; runs before any state
    /// transition that loses the socket, so a dropped socket is never
    /// observable together with live slots
    fn fail_all_pending(&mut self) {
        if !self.streams.is_empty() {
            debug!(count = self.streams.len(), "failing pending requests");
        }
        for slot in self.streams.drain() {
            slot.waiter.reply(Err(Error::Closed));
        }
        self.buffer.clear();
    }

    async fn shutdown(&mut self, stream: Option<TcpStream>, ack: Option<oneshot::Sender<()>>) {
        self.fail_all_pending();
        if let Some(mut stream) = stream {
            let _ = stream.shutdown().await;
        }
        self.notify_session(SessionEventKind::Stopped);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn notify_session(&self, kind: SessionEventKind) {
        let (Some(session), Some(host_id)) = (&self.opts.session, self.opts.host_id) else {
            return;
        };
        let _ = session.send(SessionEvent {
            kind,
            host_id,
            connection: self.id,
        });
    }
}
