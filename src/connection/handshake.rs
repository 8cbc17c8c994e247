//! Bootstrap of a fresh socket: TCP connect, Startup exchange, optional
//! keyspace bind.
//!
//! Everything here runs before the connection starts multiplexing, so reads
//! are plain awaited loops on the one expected reply, all on the reserved
//! handshake stream id. Leftover bytes past the awaited frame stay in the
//! returned buffer for the serving loop.

use core::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

use crate::constant::HANDSHAKE_STREAM_ID;
use crate::error::{Error, Result};
use crate::opts::{Host, Opts};
use crate::protocol::frame::{Frame, FrameDecoder};
use crate::protocol::request::{QueryParams, Request};
use crate::protocol::response::{CqlResult, ResponseBody};

/// Connect and run the blocking-mode handshake, returning the socket and the
/// read buffer holding any bytes received past the handshake replies
pub(crate) async fn establish(opts: &Opts) -> Result<(TcpStream, BytesMut)> {
    let mut stream = connect(opts).await?;
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    startup(&mut stream, &mut buffer, opts).await?;
    if let Some(keyspace) = &opts.keyspace {
        bind_keyspace(&mut stream, &mut buffer, keyspace, opts.response_timeout).await?;
    }

    Ok((stream, buffer))
}

/// Owned-opts variant for racing the attempt against the command queue
pub(crate) async fn establish_owned(opts: Opts) -> Result<(TcpStream, BytesMut)> {
    establish(&opts).await
}

async fn connect(opts: &Opts) -> Result<TcpStream> {
    let connecting = async {
        let stream = match &opts.host {
            Host::Addr(addr) => TcpStream::connect((*addr, opts.port)).await?,
            Host::Name(name) => TcpStream::connect((name.as_str(), opts.port)).await?,
        };
        stream.set_nodelay(opts.tcp_nodelay)?;
        Ok(stream)
    };
    match tokio::time::timeout(opts.connect_timeout, connecting).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn startup(stream: &mut TcpStream, buffer: &mut BytesMut, opts: &Opts) -> Result<()> {
    let failed = |error: Error| Error::Handshake(Box::new(error));

    let encoded = Request::Startup.encode(HANDSHAKE_STREAM_ID)?;
    write_frame(stream, &encoded, opts.response_timeout)
        .await
        .map_err(failed)?;

    let frame = read_frame(stream, buffer, opts.response_timeout)
        .await
        .map_err(failed)?;
    match frame.body {
        ResponseBody::Ready => Ok(()),
        ResponseBody::Error { code, message } => Err(failed(Error::Server { code, message })),
        _ => Err(failed(Error::InvalidFrame)),
    }
}

async fn bind_keyspace(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    keyspace: &str,
    limit: Option<Duration>,
) -> Result<()> {
    let failed = |reason: String| Error::Keyspace {
        keyspace: keyspace.to_owned(),
        reason,
    };

    let request = Request::Query {
        query: format!("USE {}", keyspace),
        params: QueryParams::default(),
    };
    let encoded = request.encode(HANDSHAKE_STREAM_ID)?;
    write_frame(stream, &encoded, limit)
        .await
        .map_err(|e| failed(e.to_string()))?;

    let frame = read_frame(stream, buffer, limit)
        .await
        .map_err(|e| failed(e.to_string()))?;
    match frame.body {
        ResponseBody::Result(CqlResult::SetKeyspace(name)) if name == keyspace => Ok(()),
        ResponseBody::Result(CqlResult::SetKeyspace(name)) => {
            Err(failed(format!("server switched to {}", name)))
        }
        ResponseBody::Error { code, message } => {
            Err(failed(Error::Server { code, message }.to_string()))
        }
        _ => Err(failed(String::from("unexpected response"))),
    }
}

/// Write a whole frame, honoring the transport send limit
///
/// A send that stalls past the limit surfaces [`Error::Timeout`], which the
/// dispatcher treats as fatal to the connection.
pub(crate) async fn write_frame(
    stream: &mut TcpStream,
    frame: &[u8],
    limit: Option<Duration>,
) -> Result<()> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, stream.write_all(frame)).await {
            Ok(result) => result.map_err(Error::IoError),
            Err(_) => Err(Error::Timeout),
        },
        None => stream.write_all(frame).await.map_err(Error::IoError),
    }
}

/// Read until one whole frame decodes, within the limit if one is set
async fn read_frame(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    limit: Option<Duration>,
) -> Result<Frame> {
    let mut decoder = FrameDecoder;
    let reading = async {
        loop {
            if let Some(frame) = decoder.decode(buffer)? {
                return Ok(frame);
            }
            let read = stream.read_buf(buffer).await.map_err(Error::IoError)?;
            if read == 0 {
                return Err(Error::Closed);
            }
        }
    };
    match limit {
        Some(limit) => match tokio::time::timeout(limit, reading).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        },
        None => reading.await,
    }
}
