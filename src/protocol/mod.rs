pub mod frame;
pub mod primitive;
pub mod request;
pub mod response;

pub use frame::{Frame, FrameDecoder, FrameHeader, set_stream_id};
pub use request::{QueryParams, Request};
pub use response::{
    ColumnSpec, ColumnType, CqlResult, Event, Prepared, ResponseBody, Row, Rows, RowsMetadata,
    SchemaChange, TableSpec,
};
