use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server error {code:#06x}: {message}")]
    Server { code: i32, message: String },

    #[error("Connection is closed")]
    Closed,

    #[error("Connection is not established")]
    NotConnected,

    #[error("Request rejected by the codec")]
    Invalid,

    #[error("Request timed out")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Handshake failed: {0}")]
    Handshake(Box<Error>),

    #[error("Failed to bind keyspace {keyspace}: {reason}")]
    Keyspace { keyspace: String, reason: String },

    #[error("Reconnection attempts exhausted")]
    MaxAttempts,

    #[error("Response received on stream {0} with no pending request")]
    UnknownStream(i16),

    #[error("Invalid frame")]
    InvalidFrame,

    #[error("Unexpected end of frame body")]
    UnexpectedEof,

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("A bug in zero-cassandra: {0}")]
    LibraryBug(color_eyre::Report),
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}
