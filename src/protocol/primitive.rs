//! Readers and writers for the CQL wire notation.
//!
//! Readers take a byte slice and return the decoded value together with the
//! remaining bytes, so parsers thread the slice through without tracking an
//! offset. All multi-byte integers on the wire are big-endian.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I32 as I32BE, I64 as I64BE, U16 as U16BE};

use crate::error::{Error, Result};

/// Read a single byte
pub fn read_byte(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((byte, rest)) => Ok((*byte, rest)),
        None => Err(Error::UnexpectedEof),
    }
}

/// Read a 2-byte unsigned integer (`[short]`)
pub fn read_short(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::UnexpectedEof);
    }
    let value = U16BE::ref_from_bytes(&data[..2])
        .map_err(|_| Error::InvalidFrame)?
        .get();
    Ok((value, &data[2..]))
}

/// Read a 4-byte signed integer (`[int]`)
pub fn read_int(data: &[u8]) -> Result<(i32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::UnexpectedEof);
    }
    let value = I32BE::ref_from_bytes(&data[..4])
        .map_err(|_| Error::InvalidFrame)?
        .get();
    Ok((value, &data[4..]))
}

/// Read an 8-byte signed integer (`[long]`)
pub fn read_long(data: &[u8]) -> Result<(i64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::UnexpectedEof);
    }
    let value = I64BE::ref_from_bytes(&data[..8])
        .map_err(|_| Error::InvalidFrame)?
        .get();
    Ok((value, &data[8..]))
}

fn read_raw(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::UnexpectedEof);
    }
    Ok(data.split_at(len))
}

/// Read a `[string]`: short length prefix followed by UTF-8 bytes
pub fn read_string(data: &[u8]) -> Result<(String, &[u8])> {
    let (len, rest) = read_short(data)?;
    let (raw, rest) = read_raw(rest, len as usize)?;
    let value = simdutf8::basic::from_utf8(raw).map_err(|_| Error::InvalidFrame)?;
    Ok((value.to_owned(), rest))
}

/// Read a `[long string]`: int length prefix followed by UTF-8 bytes
pub fn read_long_string(data: &[u8]) -> Result<(String, &[u8])> {
    let (len, rest) = read_int(data)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidFrame)?;
    let (raw, rest) = read_raw(rest, len)?;
    let value = simdutf8::basic::from_utf8(raw).map_err(|_| Error::InvalidFrame)?;
    Ok((value.to_owned(), rest))
}

/// Read a `[bytes]`: int length prefix, negative length meaning null
pub fn read_bytes(data: &[u8]) -> Result<(Option<Bytes>, &[u8])> {
    let (len, rest) = read_int(data)?;
    if len < 0 {
        return Ok((None, rest));
    }
    let (raw, rest) = read_raw(rest, len as usize)?;
    Ok((Some(Bytes::copy_from_slice(raw)), rest))
}

/// Read a `[short bytes]`: short length prefix, never null
pub fn read_short_bytes(data: &[u8]) -> Result<(Bytes, &[u8])> {
    let (len, rest) = read_short(data)?;
    let (raw, rest) = read_raw(rest, len as usize)?;
    Ok((Bytes::copy_from_slice(raw), rest))
}

/// Read a `[string list]`
pub fn read_string_list(data: &[u8]) -> Result<(Vec<String>, &[u8])> {
    let (count, mut rest) = read_short(data)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (value, r) = read_string(rest)?;
        values.push(value);
        rest = r;
    }
    Ok((values, rest))
}

/// Read a `[string multimap]` (Supported options)
pub fn read_string_multimap(data: &[u8]) -> Result<(HashMap<String, Vec<String>>, &[u8])> {
    let (count, mut rest) = read_short(data)?;
    let mut map = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let (key, r) = read_string(rest)?;
        let (values, r) = read_string_list(r)?;
        map.insert(key, values);
        rest = r;
    }
    Ok((map, rest))
}

/// Read a `[bytes map]`, discarding the content (custom payloads)
pub fn skip_bytes_map(data: &[u8]) -> Result<&[u8]> {
    let (count, mut rest) = read_short(data)?;
    for _ in 0..count {
        let (_key, r) = read_string(rest)?;
        let (_value, r) = read_bytes(r)?;
        rest = r;
    }
    Ok(rest)
}

/// Read an `[inet]`: one size byte (4 or 16), the address, an int port
pub fn read_inet(data: &[u8]) -> Result<(SocketAddr, &[u8])> {
    let (size, rest) = read_byte(data)?;
    let (addr, rest): (IpAddr, &[u8]) = match size {
        4 => {
            let (raw, rest) = read_raw(rest, 4)?;
            let octets: [u8; 4] = raw.try_into().map_err(|_| Error::InvalidFrame)?;
            (IpAddr::V4(Ipv4Addr::from(octets)), rest)
        }
        16 => {
            let (raw, rest) = read_raw(rest, 16)?;
            let octets: [u8; 16] = raw.try_into().map_err(|_| Error::InvalidFrame)?;
            (IpAddr::V6(Ipv6Addr::from(octets)), rest)
        }
        _ => return Err(Error::InvalidFrame),
    };
    let (port, rest) = read_int(rest)?;
    let port = u16::try_from(port).map_err(|_| Error::InvalidFrame)?;
    Ok((SocketAddr::new(addr, port), rest))
}

/// Write a `[short]`
pub fn write_short(out: &mut BytesMut, value: u16) {
    out.put_u16(value);
}

/// Write an `[int]`
pub fn write_int(out: &mut BytesMut, value: i32) {
    out.put_i32(value);
}

/// Write a `[string]`
pub fn write_string(out: &mut BytesMut, value: &str) {
    out.put_u16(value.len() as u16);
    out.put_slice(value.as_bytes());
}

/// Write a `[long string]`
pub fn write_long_string(out: &mut BytesMut, value: &str) {
    out.put_i32(value.len() as i32);
    out.put_slice(value.as_bytes());
}

/// Write a `[bytes]`; `None` encodes as length -1
pub fn write_bytes(out: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(value) => {
            out.put_i32(value.len() as i32);
            out.put_slice(value);
        }
        None => out.put_i32(-1),
    }
}

/// Write a `[short bytes]`
pub fn write_short_bytes(out: &mut BytesMut, value: &[u8]) {
    out.put_u16(value.len() as u16);
    out.put_slice(value);
}

/// Write a `[string list]`
pub fn write_string_list(out: &mut BytesMut, values: &[String]) {
    out.put_u16(values.len() as u16);
    for value in values {
        write_string(out, value);
    }
}

/// Write a `[string map]` from ordered pairs
pub fn write_string_map(out: &mut BytesMut, pairs: &[(&str, &str)]) {
    out.put_u16(pairs.len() as u16);
    for (key, value) in pairs {
        write_string(out, key);
        write_string(out, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut out = BytesMut::new();
        write_string(&mut out, "system.local");
        let (value, rest) = read_string(&out).unwrap();
        assert_eq!(value, "system.local");
        assert!(rest.is_empty());
    }

    #[test]
    fn bytes_null_is_negative_length() {
        let mut out = BytesMut::new();
        write_bytes(&mut out, None);
        assert_eq!(&out[..], &(-1i32).to_be_bytes());
        let (value, _) = read_bytes(&out).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn truncated_input_reports_eof() {
        assert!(matches!(read_int(&[0, 0, 1]), Err(Error::UnexpectedEof)));
        let mut out = BytesMut::new();
        write_string(&mut out, "peers");
        assert!(matches!(
            read_string(&out[..3]),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn inet_v4() {
        let mut data = BytesMut::new();
        data.put_u8(4);
        data.put_slice(&[10, 0, 0, 7]);
        data.put_i32(9042);
        let (addr, rest) = read_inet(&data).unwrap();
        assert_eq!(addr, "10.0.0.7:9042".parse().unwrap());
        assert!(rest.is_empty());
    }

    #[test]
    fn multimap_round_trip() {
        let mut out = BytesMut::new();
        out.put_u16(1);
        write_string(&mut out, "CQL_VERSION");
        write_string_list(&mut out, &[String::from("3.0.0"), String::from("3.4.4")]);
        let (map, rest) = read_string_multimap(&out).unwrap();
        assert_eq!(map["CQL_VERSION"], vec!["3.0.0", "3.4.4"]);
        assert!(rest.is_empty());
    }
}
