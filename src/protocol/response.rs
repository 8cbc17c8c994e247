//! Decoded response bodies.
//!
//! Row cells are kept as opaque bytes; this crate multiplexes and routes
//! results, it does not deserialize column values.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::constant::{Opcode, RowsFlags, result_kind};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// One decoded row: a cell per column, `None` for null
pub type Row = Vec<Option<Bytes>>;

#[derive(Debug, Clone)]
pub enum ResponseBody {
    Ready,
    Authenticate { class: String },
    Supported { options: HashMap<String, Vec<String>> },
    Error { code: i32, message: String },
    Event(Event),
    Result(CqlResult),
}

#[derive(Debug, Clone)]
pub enum CqlResult {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

#[derive(Debug, Clone)]
pub struct Rows {
    pub metadata: RowsMetadata,
    pub row_count: i32,
    pub rows: Vec<Row>,
    /// Continuation token; present iff more pages follow
    pub paging_state: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct RowsMetadata {
    pub column_count: i32,
    pub global_table: Option<TableSpec>,
    /// Empty when the server omitted metadata
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub keyspace: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub table: Option<TableSpec>,
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
    Tuple(Vec<ColumnType>),
}

#[derive(Debug, Clone)]
pub struct Prepared {
    pub id: Bytes,
    pub pk_indices: Vec<u16>,
    pub bind_metadata: RowsMetadata,
    pub result_metadata: RowsMetadata,
}

#[derive(Debug, Clone)]
pub enum Event {
    TopologyChange { change: String, node: SocketAddr },
    StatusChange { change: String, node: SocketAddr },
    SchemaChange(SchemaChange),
}

#[derive(Debug, Clone)]
pub struct SchemaChange {
    pub change_type: String,
    pub target: String,
    pub keyspace: String,
    pub name: Option<String>,
    pub arguments: Vec<String>,
}

/// Decode a response body for the given opcode
pub fn read_body(opcode: u8, payload: &[u8]) -> Result<ResponseBody> {
    let opcode = Opcode::from_byte(opcode).ok_or(Error::InvalidFrame)?;
    match opcode {
        Opcode::Ready => Ok(ResponseBody::Ready),
        Opcode::Authenticate => {
            let (class, _) = read_string(payload)?;
            Ok(ResponseBody::Authenticate { class })
        }
        Opcode::Supported => {
            let (options, _) = read_string_multimap(payload)?;
            Ok(ResponseBody::Supported { options })
        }
        Opcode::Error => {
            let (code, rest) = read_int(payload)?;
            let (message, _) = read_string(rest)?;
            // Code-specific trailing fields (unavailable, write timeout, ...)
            // are not needed for routing and are ignored.
            Ok(ResponseBody::Error { code, message })
        }
        Opcode::Event => Ok(ResponseBody::Event(read_event(payload)?)),
        Opcode::Result => Ok(ResponseBody::Result(read_result(payload)?)),
        _ => Err(Error::InvalidFrame),
    }
}

fn read_event(payload: &[u8]) -> Result<Event> {
    let (kind, rest) = read_string(payload)?;
    match kind.as_str() {
        "TOPOLOGY_CHANGE" => {
            let (change, rest) = read_string(rest)?;
            let (node, _) = read_inet(rest)?;
            Ok(Event::TopologyChange { change, node })
        }
        "STATUS_CHANGE" => {
            let (change, rest) = read_string(rest)?;
            let (node, _) = read_inet(rest)?;
            Ok(Event::StatusChange { change, node })
        }
        "SCHEMA_CHANGE" => Ok(Event::SchemaChange(read_schema_change(rest)?)),
        _ => Err(Error::InvalidFrame),
    }
}

fn read_schema_change(data: &[u8]) -> Result<SchemaChange> {
    let (change_type, rest) = read_string(data)?;
    let (target, rest) = read_string(rest)?;
    let (keyspace, rest) = read_string(rest)?;
    let (name, arguments) = match target.as_str() {
        "KEYSPACE" => (None, Vec::new()),
        "TABLE" | "TYPE" => {
            let (name, _) = read_string(rest)?;
            (Some(name), Vec::new())
        }
        "FUNCTION" | "AGGREGATE" => {
            let (name, rest) = read_string(rest)?;
            let (arguments, _) = read_string_list(rest)?;
            (Some(name), arguments)
        }
        _ => return Err(Error::InvalidFrame),
    };
    Ok(SchemaChange {
        change_type,
        target,
        keyspace,
        name,
        arguments,
    })
}

fn read_result(payload: &[u8]) -> Result<CqlResult> {
    let (kind, rest) = read_int(payload)?;
    match kind {
        result_kind::VOID => Ok(CqlResult::Void),
        result_kind::ROWS => Ok(CqlResult::Rows(read_rows(rest)?)),
        result_kind::SET_KEYSPACE => {
            let (name, _) = read_string(rest)?;
            Ok(CqlResult::SetKeyspace(name))
        }
        result_kind::PREPARED => Ok(CqlResult::Prepared(read_prepared(rest)?)),
        result_kind::SCHEMA_CHANGE => Ok(CqlResult::SchemaChange(read_schema_change(rest)?)),
        _ => Err(Error::InvalidFrame),
    }
}

fn read_rows(data: &[u8]) -> Result<Rows> {
    let (flags, rest) = read_int(data)?;
    let flags = RowsFlags::from_bits_truncate(flags as u32);
    let (column_count, rest) = read_int(rest)?;

    let (paging_state, rest) = if flags.contains(RowsFlags::HAS_MORE_PAGES) {
        read_bytes(rest)?
    } else {
        (None, rest)
    };

    let (metadata, rest) = if flags.contains(RowsFlags::NO_METADATA) {
        (
            RowsMetadata {
                column_count,
                global_table: None,
                columns: Vec::new(),
            },
            rest,
        )
    } else {
        read_column_specs(rest, flags.contains(RowsFlags::GLOBAL_TABLES_SPEC), column_count)?
    };

    let (row_count, mut rest) = read_int(rest)?;
    let rows_len = usize::try_from(row_count).map_err(|_| Error::InvalidFrame)?;
    let cols_len = usize::try_from(column_count).map_err(|_| Error::InvalidFrame)?;
    let mut rows = Vec::with_capacity(rows_len);
    for _ in 0..rows_len {
        let mut row = Vec::with_capacity(cols_len);
        for _ in 0..cols_len {
            let (cell, r) = read_bytes(rest)?;
            row.push(cell);
            rest = r;
        }
        rows.push(row);
    }

    Ok(Rows {
        metadata,
        row_count,
        rows,
        paging_state,
    })
}

fn read_column_specs(
    data: &[u8],
    global: bool,
    column_count: i32,
) -> Result<(RowsMetadata, &[u8])> {
    let (global_table, mut rest) = if global {
        let (keyspace, r) = read_string(data)?;
        let (table, r) = read_string(r)?;
        (Some(TableSpec { keyspace, table }), r)
    } else {
        (None, data)
    };

    let cols_len = usize::try_from(column_count).map_err(|_| Error::InvalidFrame)?;
    let mut columns = Vec::with_capacity(cols_len);
    for _ in 0..cols_len {
        let (table, r) = if global {
            (None, rest)
        } else {
            let (keyspace, r) = read_string(rest)?;
            let (table, r) = read_string(r)?;
            (Some(TableSpec { keyspace, table }), r)
        };
        let (name, r) = read_string(r)?;
        let (ty, r) = read_option(r)?;
        columns.push(ColumnSpec { table, name, ty });
        rest = r;
    }

    Ok((
        RowsMetadata {
            column_count,
            global_table,
            columns,
        },
        rest,
    ))
}

fn read_option(data: &[u8]) -> Result<(ColumnType, &[u8])> {
    let (id, rest) = read_short(data)?;
    Ok(match id {
        0x0000 => {
            let (class, rest) = read_string(rest)?;
            (ColumnType::Custom(class), rest)
        }
        0x0001 => (ColumnType::Ascii, rest),
        0x0002 => (ColumnType::Bigint, rest),
        0x0003 => (ColumnType::Blob, rest),
        0x0004 => (ColumnType::Boolean, rest),
        0x0005 => (ColumnType::Counter, rest),
        0x0006 => (ColumnType::Decimal, rest),
        0x0007 => (ColumnType::Double, rest),
        0x0008 => (ColumnType::Float, rest),
        0x0009 => (ColumnType::Int, rest),
        0x000B => (ColumnType::Timestamp, rest),
        0x000C => (ColumnType::Uuid, rest),
        0x000D => (ColumnType::Varchar, rest),
        0x000E => (ColumnType::Varint, rest),
        0x000F => (ColumnType::Timeuuid, rest),
        0x0010 => (ColumnType::Inet, rest),
        0x0011 => (ColumnType::Date, rest),
        0x0012 => (ColumnType::Time, rest),
        0x0013 => (ColumnType::Smallint, rest),
        0x0014 => (ColumnType::Tinyint, rest),
        0x0020 => {
            let (inner, rest) = read_option(rest)?;
            (ColumnType::List(Box::new(inner)), rest)
        }
        0x0021 => {
            let (key, rest) = read_option(rest)?;
            let (value, rest) = read_option(rest)?;
            (ColumnType::Map(Box::new(key), Box::new(value)), rest)
        }
        0x0022 => {
            let (inner, rest) = read_option(rest)?;
            (ColumnType::Set(Box::new(inner)), rest)
        }
        0x0030 => {
            let (keyspace, rest) = read_string(rest)?;
            let (name, rest) = read_string(rest)?;
            let (count, mut rest) = read_short(rest)?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (field, r) = read_string(rest)?;
                let (ty, r) = read_option(r)?;
                fields.push((field, ty));
                rest = r;
            }
            (
                ColumnType::Udt {
                    keyspace,
                    name,
                    fields,
                },
                rest,
            )
        }
        0x0031 => {
            let (count, mut rest) = read_short(rest)?;
            let mut members = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (ty, r) = read_option(rest)?;
                members.push(ty);
                rest = r;
            }
            (ColumnType::Tuple(members), rest)
        }
        _ => return Err(Error::InvalidFrame),
    })
}

fn read_prepared(data: &[u8]) -> Result<Prepared> {
    let (id, rest) = read_short_bytes(data)?;

    // Bind metadata: flags, column count, partition key indices, specs.
    let (flags, rest) = read_int(rest)?;
    let flags = RowsFlags::from_bits_truncate(flags as u32);
    let (column_count, rest) = read_int(rest)?;
    let (pk_count, mut rest) = read_int(rest)?;
    let pk_len = usize::try_from(pk_count).map_err(|_| Error::InvalidFrame)?;
    let mut pk_indices = Vec::with_capacity(pk_len);
    for _ in 0..pk_len {
        let (index, r) = read_short(rest)?;
        pk_indices.push(index);
        rest = r;
    }
    let (bind_metadata, rest) =
        read_column_specs(rest, flags.contains(RowsFlags::GLOBAL_TABLES_SPEC), column_count)?;

    // Result metadata: shaped like a Rows metadata block.
    let (flags, rest) = read_int(rest)?;
    let flags = RowsFlags::from_bits_truncate(flags as u32);
    let (column_count, rest) = read_int(rest)?;
    let (result_metadata, _) = if flags.contains(RowsFlags::NO_METADATA) {
        (
            RowsMetadata {
                column_count,
                global_table: None,
                columns: Vec::new(),
            },
            rest,
        )
    } else {
        read_column_specs(rest, flags.contains(RowsFlags::GLOBAL_TABLES_SPEC), column_count)?
    };

    Ok(Prepared {
        id,
        pk_indices,
        bind_metadata,
        result_metadata,
    })
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::constant::Opcode;

    fn rows_body(flags: RowsFlags, paging_state: Option<&[u8]>, cells: &[&[&[u8]]]) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_i32(result_kind::ROWS);
        body.put_i32(flags.bits() as i32);
        let column_count = cells.first().map_or(0, |row| row.len());
        body.put_i32(column_count as i32);
        if let Some(state) = paging_state {
            write_bytes(&mut body, Some(state));
        }
        body.put_i32(cells.len() as i32);
        for row in cells {
            for cell in *row {
                write_bytes(&mut body, Some(cell));
            }
        }
        body
    }

    #[test]
    fn error_body_ignores_trailing_fields() {
        let mut body = BytesMut::new();
        body.put_i32(0x1000);
        write_string(&mut body, "unavailable");
        body.put_u16(0x0004); // consistency
        body.put_i32(3); // required
        body.put_i32(1); // alive
        let decoded = read_body(Opcode::Error as u8, &body).unwrap();
        match decoded {
            ResponseBody::Error { code, message } => {
                assert_eq!(code, 0x1000);
                assert_eq!(message, "unavailable");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn rows_without_metadata() {
        let body = rows_body(
            RowsFlags::NO_METADATA | RowsFlags::HAS_MORE_PAGES,
            Some(b"token"),
            &[&[b"a", b"b"], &[b"c", b"d"]],
        );
        let decoded = read_body(Opcode::Result as u8, &body).unwrap();
        let ResponseBody::Result(CqlResult::Rows(rows)) = decoded else {
            panic!("expected rows");
        };
        assert_eq!(rows.row_count, 2);
        assert_eq!(rows.metadata.column_count, 2);
        assert_eq!(rows.paging_state.as_deref(), Some(&b"token"[..]));
        assert_eq!(rows.rows[1][0].as_deref(), Some(&b"c"[..]));
    }

    #[test]
    fn rows_with_global_table_spec() {
        let mut body = BytesMut::new();
        body.put_i32(result_kind::ROWS);
        body.put_i32(RowsFlags::GLOBAL_TABLES_SPEC.bits() as i32);
        body.put_i32(1);
        write_string(&mut body, "system");
        write_string(&mut body, "local");
        write_string(&mut body, "release_version");
        body.put_u16(0x000D); // varchar
        body.put_i32(1);
        write_bytes(&mut body, Some(b"4.0.7"));

        let decoded = read_body(Opcode::Result as u8, &body).unwrap();
        let ResponseBody::Result(CqlResult::Rows(rows)) = decoded else {
            panic!("expected rows");
        };
        let table = rows.metadata.global_table.as_ref().unwrap();
        assert_eq!(table.keyspace, "system");
        assert_eq!(rows.metadata.columns[0].name, "release_version");
        assert_eq!(rows.metadata.columns[0].ty, ColumnType::Varchar);
        assert!(rows.paging_state.is_none());
    }

    #[test]
    fn nested_collection_type() {
        let mut data = BytesMut::new();
        data.put_u16(0x0021); // map
        data.put_u16(0x000D); // varchar
        data.put_u16(0x0020); // list
        data.put_u16(0x0009); // int
        let (ty, rest) = read_option(&data).unwrap();
        assert_eq!(
            ty,
            ColumnType::Map(
                Box::new(ColumnType::Varchar),
                Box::new(ColumnType::List(Box::new(ColumnType::Int)))
            )
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn status_change_event() {
        let mut body = BytesMut::new();
        write_string(&mut body, "STATUS_CHANGE");
        write_string(&mut body, "DOWN");
        body.put_u8(4);
        body.put_slice(&[10, 0, 0, 9]);
        body.put_i32(9042);
        let decoded = read_body(Opcode::Event as u8, &body).unwrap();
        let ResponseBody::Event(Event::StatusChange { change, node }) = decoded else {
            panic!("expected status change");
        };
        assert_eq!(change, "DOWN");
        assert_eq!(node, "10.0.0.9:9042".parse().unwrap());
    }

    #[test]
    fn set_keyspace_result() {
        let mut body = BytesMut::new();
        body.put_i32(result_kind::SET_KEYSPACE);
        write_string(&mut body, "ks1");
        let decoded = read_body(Opcode::Result as u8, &body).unwrap();
        assert!(matches!(
            decoded,
            ResponseBody::Result(CqlResult::SetKeyspace(name)) if name == "ks1"
        ));
    }
}
