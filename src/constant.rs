use core::time::Duration;

/// Native protocol version spoken by this crate (CQL binary protocol v4)
pub const PROTOCOL_VERSION: u8 = 0x04;

/// Version byte carried by request frames
pub const REQUEST_VERSION: u8 = PROTOCOL_VERSION;

/// Version byte carried by response frames (direction bit set)
pub const RESPONSE_VERSION: u8 = 0x80 | PROTOCOL_VERSION;

/// CQL version advertised in the Startup options map
pub const CQL_VERSION: &str = "3.0.0";

/// Fixed size of a frame header: version, flags, stream, opcode, body length
pub const HEADER_LEN: usize = 9;

/// Stream id used by the server for frames it initiates (events)
pub const EVENT_STREAM_ID: i16 = -1;

/// Stream id used during the bootstrap handshake; responses on it after the
/// handshake are accepted silently
pub const HANDSHAKE_STREAM_ID: i16 = 0;

/// Reserved stream id; inbound frames on it are logged and never correlated
pub const LOG_STREAM_ID: i16 = 1;

/// Lowest stream id handed out to user requests
pub const MIN_STREAM_ID: u16 = 2;

/// Highest stream id handed out to user requests; allocation wraps back to
/// [`MIN_STREAM_ID`] past this point
pub const MAX_STREAM_ID: u16 = 32_000;

/// Default native protocol port
pub const DEFAULT_PORT: u16 = 9042;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default caller-side wait applied by `Connection::send`
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5_000);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl Opcode {
    /// Map a wire byte back to an opcode, `None` for bytes this protocol
    /// version does not define
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Error,
            0x01 => Self::Startup,
            0x02 => Self::Ready,
            0x03 => Self::Authenticate,
            0x05 => Self::Options,
            0x06 => Self::Supported,
            0x07 => Self::Query,
            0x08 => Self::Result,
            0x09 => Self::Prepare,
            0x0A => Self::Execute,
            0x0B => Self::Register,
            0x0C => Self::Event,
            0x0D => Self::Batch,
            0x0E => Self::AuthChallenge,
            0x0F => Self::AuthResponse,
            0x10 => Self::AuthSuccess,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Flags byte of the frame header
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Frame body is compressed (never negotiated by this crate)
        const COMPRESSION = 0x01;
        /// Response body starts with a tracing id
        const TRACING = 0x02;
        /// Body carries a custom payload map after the tracing id
        const CUSTOM_PAYLOAD = 0x04;
        /// Body carries a warnings string list before the message
        const WARNING = 0x08;
    }
}

bitflags::bitflags! {
    /// Flags byte of QUERY / EXECUTE parameters
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u8 {
        /// Parameters include bound values
        const VALUES = 0x01;
        /// Server may omit the result metadata
        const SKIP_METADATA = 0x02;
        /// Parameters include a result page size
        const PAGE_SIZE = 0x04;
        /// Parameters include a paging state from a previous page
        const WITH_PAGING_STATE = 0x08;
        /// Parameters include a serial consistency level
        const WITH_SERIAL_CONSISTENCY = 0x10;
        /// Parameters include a default timestamp
        const WITH_DEFAULT_TIMESTAMP = 0x20;
        /// Bound values are sent with names
        const WITH_NAMES = 0x40;
    }
}

bitflags::bitflags! {
    /// Flags int of a Rows result metadata block
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RowsFlags: u32 {
        /// All columns share one keyspace/table spec
        const GLOBAL_TABLES_SPEC = 0x0001;
        /// Metadata carries a paging state; more pages follow
        const HAS_MORE_PAGES = 0x0002;
        /// Column specs are omitted
        const NO_METADATA = 0x0004;
    }
}

/// Kind discriminant of a Result response body
pub mod result_kind {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}
