use bytes::{Bytes, BytesMut};
use smart_default::SmartDefault;

use crate::constant::{CQL_VERSION, Consistency, HEADER_LEN, Opcode, QueryFlags, REQUEST_VERSION};
use crate::error::{Error, Result};
use crate::protocol::frame::{set_stream_id, wrap_request};
use crate::protocol::primitive::*;

/// A request submitted over the connection
///
/// `Raw` carries a frame that was already encoded elsewhere; the connection
/// only patches its stream id before transmission.
#[derive(Debug, Clone)]
pub enum Request {
    Startup,
    Options,
    Query { query: String, params: QueryParams },
    Prepare { query: String },
    Execute { id: Bytes, params: QueryParams },
    Register { events: Vec<String> },
    Raw(Bytes),
}

/// Parameters of a QUERY or EXECUTE request
#[derive(Debug, Clone, SmartDefault)]
pub struct QueryParams {
    #[default(Consistency::One)]
    pub consistency: Consistency,
    /// Bound values, already serialized
    pub values: Vec<Bytes>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub skip_metadata: bool,
}

impl Request {
    /// Encode the request as a complete frame carrying `stream`
    pub fn encode(&self, stream: i16) -> Result<Bytes> {
        let mut body = BytesMut::new();
        let opcode = match self {
            Request::Startup => {
                write_string_map(&mut body, &[("CQL_VERSION", CQL_VERSION)]);
                Opcode::Startup
            }
            Request::Options => Opcode::Options,
            Request::Query { query, params } => {
                write_long_string(&mut body, query);
                write_query_params(&mut body, params);
                Opcode::Query
            }
            Request::Prepare { query } => {
                write_long_string(&mut body, query);
                Opcode::Prepare
            }
            Request::Execute { id, params } => {
                write_short_bytes(&mut body, id);
                write_query_params(&mut body, params);
                Opcode::Execute
            }
            Request::Register { events } => {
                write_string_list(&mut body, events);
                Opcode::Register
            }
            Request::Raw(frame) => {
                if frame.len() < HEADER_LEN || frame[0] != REQUEST_VERSION {
                    return Err(Error::Invalid);
                }
                let mut patched = BytesMut::from(&frame[..]);
                set_stream_id(&mut patched, stream)?;
                return Ok(patched.freeze());
            }
        };
        Ok(wrap_request(opcode, stream, &body))
    }

    /// Clone the request with its paging state replaced by `token`
    ///
    /// Only QUERY and EXECUTE can carry a paging state; other requests never
    /// produce paged results and return `None`.
    pub(crate) fn with_paging_state(&self, token: Bytes) -> Option<Request> {
        match self {
            Request::Query { query, params } => {
                let mut params = params.clone();
                params.paging_state = Some(token);
                Some(Request::Query {
                    query: query.clone(),
                    params,
                })
            }
            Request::Execute { id, params } => {
                let mut params = params.clone();
                params.paging_state = Some(token);
                Some(Request::Execute {
                    id: id.clone(),
                    params,
                })
            }
            _ => None,
        }
    }
}

fn write_query_params(body: &mut BytesMut, params: &QueryParams) {
    let mut flags = QueryFlags::empty();
    if !params.values.is_empty() {
        flags |= QueryFlags::VALUES;
    }
    if params.skip_metadata {
        flags |= QueryFlags::SKIP_METADATA;
    }
    if params.page_size.is_some() {
        flags |= QueryFlags::PAGE_SIZE;
    }
    if params.paging_state.is_some() {
        flags |= QueryFlags::WITH_PAGING_STATE;
    }

    write_short(body, params.consistency as u16);
    body.extend_from_slice(&[flags.bits()]);
    if !params.values.is_empty() {
        write_short(body, params.values.len() as u16);
        for value in &params.values {
            write_bytes(body, Some(value));
        }
    }
    if let Some(page_size) = params.page_size {
        write_int(body, page_size);
    }
    if let Some(paging_state) = &params.paging_state {
        write_bytes(body, Some(paging_state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::HANDSHAKE_STREAM_ID;

    #[test]
    fn startup_body_is_the_options_map() {
        let frame = Request::Startup.encode(HANDSHAKE_STREAM_ID).unwrap();
        assert_eq!(frame[0], REQUEST_VERSION);
        assert_eq!(frame[4], Opcode::Startup as u8);
        let (map, rest) = {
            let body = &frame[HEADER_LEN..];
            let (count, rest) = read_short(body).unwrap();
            assert_eq!(count, 1);
            let (key, rest) = read_string(rest).unwrap();
            let (value, rest) = read_string(rest).unwrap();
            ((key, value), rest)
        };
        assert_eq!(map, (String::from("CQL_VERSION"), String::from("3.0.0")));
        assert!(rest.is_empty());
    }

    #[test]
    fn encode_with_stream_equals_encode_then_patch() {
        let request = Request::Query {
            query: String::from("SELECT * FROM system.peers"),
            params: QueryParams::default(),
        };
        let direct = request.encode(42).unwrap();
        let mut patched = BytesMut::from(&request.encode(0).unwrap()[..]);
        set_stream_id(&mut patched, 42).unwrap();
        assert_eq!(direct[..], patched[..]);
    }

    #[test]
    fn query_flags_follow_params() {
        let request = Request::Query {
            query: String::from("SELECT * FROM t"),
            params: QueryParams {
                page_size: Some(100),
                paging_state: Some(Bytes::from_static(b"tok")),
                ..QueryParams::default()
            },
        };
        let frame = request.encode(2).unwrap();
        let body = &frame[HEADER_LEN..];
        let (_query, rest) = read_long_string(body).unwrap();
        let (consistency, rest) = read_short(rest).unwrap();
        assert_eq!(consistency, Consistency::One as u16);
        let (flags, rest) = read_byte(rest).unwrap();
        assert_eq!(
            QueryFlags::from_bits_truncate(flags),
            QueryFlags::PAGE_SIZE | QueryFlags::WITH_PAGING_STATE
        );
        let (page_size, rest) = read_int(rest).unwrap();
        assert_eq!(page_size, 100);
        let (state, rest) = read_bytes(rest).unwrap();
        assert_eq!(state.as_deref(), Some(&b"tok"[..]));
        assert!(rest.is_empty());
    }

    #[test]
    fn paging_state_override() {
        let request = Request::Query {
            query: String::from("SELECT * FROM t"),
            params: QueryParams::default(),
        };
        let next = request
            .with_paging_state(Bytes::from_static(b"next-page"))
            .unwrap();
        let Request::Query { params, .. } = &next else {
            panic!("variant changed");
        };
        assert_eq!(params.paging_state.as_deref(), Some(&b"next-page"[..]));
        assert!(Request::Startup
            .with_paging_state(Bytes::from_static(b"t"))
            .is_none());
    }

    #[test]
    fn raw_frame_is_patched_not_rebuilt() {
        let inner = Request::Prepare {
            query: String::from("SELECT * FROM t WHERE k = ?"),
        };
        let encoded = inner.encode(9).unwrap();
        let raw = Request::Raw(encoded.clone());
        assert_eq!(raw.encode(9).unwrap()[..], encoded[..]);
        assert_eq!(raw.encode(10).unwrap()[..], inner.encode(10).unwrap()[..]);
    }

    #[test]
    fn raw_frame_too_short_is_rejected() {
        let raw = Request::Raw(Bytes::from_static(b"\x04\x00"));
        assert!(matches!(raw.encode(2), Err(Error::Invalid)));
    }
}
