pub mod connection;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;
mod reconnect;

pub use connection::{
    AsyncReply, Connection, ConnectionId, Correlation, RowSet, RowSource, RowStream, SessionEvent,
    SessionEventKind, Value,
};
pub use error::{Error, Result};
pub use opts::{Host, Opts};
pub use protocol::{Event, QueryParams, Request};
pub use reconnect::{Decision, ExponentialReconnection, ReconnectionPolicy};
