use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zerocopy::byteorder::big_endian::{I16 as I16BE, U32 as U32BE};

use crate::constant::{FrameFlags, HEADER_LEN, Opcode, REQUEST_VERSION, RESPONSE_VERSION};
use crate::error::{Error, Result};
use crate::protocol::primitive::{read_string_list, skip_bytes_map};
use crate::protocol::response::{self, ResponseBody};

/// CQL frame header (zero-copy)
///
/// Layout matches the native protocol wire format:
/// ```text
/// 1   version (direction bit | protocol version)
/// 1   flags
/// 2   stream id (big-endian, signed)
/// 1   opcode
/// 4   body length (big-endian)
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub stream: I16BE,
    pub opcode: u8,
    pub length: U32BE,
}

impl FrameHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::UnexpectedEof);
        }
        Self::ref_from_bytes(&data[..HEADER_LEN]).map_err(|_| Error::InvalidFrame)
    }

    pub fn body_len(&self) -> usize {
        self.length.get() as usize
    }
}

/// One whole inbound frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub stream: i16,
    /// Server warnings attached via the WARNING flag
    pub warnings: Vec<String>,
    pub body: ResponseBody,
}

/// Incremental frame decoder over an inbound byte buffer
///
/// Holds no state of its own: a frame is consumed from the buffer only once
/// the header and the complete body are present, so the buffer retains
/// exactly the trailing partial frame between socket reads.
#[derive(Debug, Default)]
pub struct FrameDecoder;

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::from_bytes(&src[..HEADER_LEN])?;
        if header.version != RESPONSE_VERSION {
            return Err(Error::InvalidFrame);
        }
        let flags = FrameFlags::from_bits_truncate(header.flags);
        if flags.contains(FrameFlags::COMPRESSION) {
            // Compression is never negotiated; a compressed body is garbage.
            return Err(Error::InvalidFrame);
        }
        let stream = header.stream.get();
        let opcode = header.opcode;
        let body_len = header.body_len();
        if src.len() < HEADER_LEN + body_len {
            src.reserve(HEADER_LEN + body_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(body_len).freeze();
        let mut body = &payload[..];

        if flags.contains(FrameFlags::TRACING) {
            if body.len() < 16 {
                return Err(Error::UnexpectedEof);
            }
            body = &body[16..];
        }
        if flags.contains(FrameFlags::CUSTOM_PAYLOAD) {
            body = skip_bytes_map(body)?;
        }
        let warnings = if flags.contains(FrameFlags::WARNING) {
            let (warnings, rest) = read_string_list(body)?;
            body = rest;
            warnings
        } else {
            Vec::new()
        };

        Ok(Some(Frame {
            stream,
            warnings,
            body: response::read_body(opcode, body)?,
        }))
    }
}

/// Assemble a request frame from an encoded body
pub fn wrap_request(opcode: Opcode, stream: i16, body: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u8(REQUEST_VERSION);
    frame.put_u8(0);
    frame.put_i16(stream);
    frame.put_u8(opcode as u8);
    frame.put_u32(body.len() as u32);
    frame.put_slice(body);
    frame.freeze()
}

/// Patch the stream id of an already-encoded request frame in place
pub fn set_stream_id(frame: &mut BytesMut, stream: i16) -> Result<()> {
    if frame.len() < HEADER_LEN || frame[0] != REQUEST_VERSION {
        return Err(Error::Invalid);
    }
    frame[2..4].copy_from_slice(&stream.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_frame(stream: i16) -> Bytes {
        let mut frame = BytesMut::with_capacity(HEADER_LEN);
        frame.put_u8(RESPONSE_VERSION);
        frame.put_u8(0);
        frame.put_i16(stream);
        frame.put_u8(Opcode::Ready as u8);
        frame.put_u32(0);
        frame.freeze()
    }

    #[test]
    fn decode_needs_whole_header() {
        let mut decoder = FrameDecoder;
        let mut buffer = BytesMut::from(&ready_frame(7)[..5]);
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn decode_retains_partial_body() {
        let mut decoder = FrameDecoder;
        let mut frame = BytesMut::new();
        frame.put_u8(RESPONSE_VERSION);
        frame.put_u8(0);
        frame.put_i16(3);
        frame.put_u8(Opcode::Error as u8);
        frame.put_u32(10);
        frame.put_slice(&[0, 0, 0, 1]); // body cut short

        let mut buffer = frame.clone();
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], &frame[..]);
    }

    #[test]
    fn decode_consumes_whole_frames_eagerly() {
        let mut decoder = FrameDecoder;
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&ready_frame(2));
        buffer.extend_from_slice(&ready_frame(3));
        buffer.extend_from_slice(&ready_frame(4)[..4]); // trailing partial

        let first = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(first.stream, 2);
        let second = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.stream, 3);
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], &ready_frame(4)[..4]);
    }

    #[test]
    fn decode_rejects_request_direction() {
        let mut decoder = FrameDecoder;
        let mut frame = BytesMut::from(&ready_frame(2)[..]);
        frame[0] = REQUEST_VERSION;
        let mut buffer = frame;
        assert!(matches!(
            decoder.decode(&mut buffer),
            Err(Error::InvalidFrame)
        ));
    }

    #[test]
    fn patch_stream_id() {
        let body = BytesMut::new();
        let encoded = wrap_request(Opcode::Options, 0, &body);
        let mut patched = BytesMut::from(&encoded[..]);
        set_stream_id(&mut patched, 77).unwrap();
        assert_eq!(patched[..], wrap_request(Opcode::Options, 77, &body)[..]);
    }

    #[test]
    fn patch_rejects_response_frames() {
        let mut frame = BytesMut::from(&ready_frame(2)[..]);
        assert!(matches!(set_stream_id(&mut frame, 5), Err(Error::Invalid)));
    }
}
