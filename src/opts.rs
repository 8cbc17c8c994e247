use core::fmt;
use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr};

use smart_default::SmartDefault;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::connection::SessionEvent;
use crate::constant::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};
use crate::error::Error;
use crate::protocol::Event;
use crate::reconnect::{ExponentialReconnection, ReconnectionPolicy};

/// The node this connection talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    /// A resolved address
    Addr(IpAddr),
    /// A hostname resolved at connect time
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Addr(addr) => addr.fmt(f),
            Host::Name(name) => name.fmt(f),
        }
    }
}

/// A configuration for a connection
///
/// ```rs
/// let mut opts1 = Opts::default();
/// opts1.keyspace = Some("metrics".to_string());
///
/// let opts2 = Opts::try_from("cassandra://10.0.0.7:9042/metrics")?;
/// ```
#[derive(Debug, Clone, SmartDefault)]
pub struct Opts {
    /// Enable TCP_NODELAY socket option to disable Nagle's algorithm
    #[default(true)]
    pub tcp_nodelay: bool,

    #[default(Host::Addr(IpAddr::V4(Ipv4Addr::LOCALHOST)))]
    pub host: Host,

    /// Node identity attached to session notifications; without it the
    /// session sink is never notified
    pub host_id: Option<Uuid>,

    #[default(DEFAULT_PORT)]
    pub port: u16,

    /// Keyspace bound with `USE` right after the handshake
    pub keyspace: Option<String>,

    /// Limit on TCP connection establishment
    #[default(DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,

    /// Limit on handshake reads and socket sends; `None` is unbounded
    pub response_timeout: Option<Duration>,

    /// When true (the default) `Connection::connect` returns immediately and
    /// the handshake runs in the background; when false the first handshake
    /// runs inline and its failure is returned to the caller
    #[default(true)]
    pub async_init: bool,

    /// Lifecycle notifications (opened / closed / stopped / prepared)
    pub session: Option<UnboundedSender<SessionEvent>>,

    /// Server-pushed event frames
    pub events: Option<UnboundedSender<Event>>,

    #[default(_code = "Box::new(ExponentialReconnection::default())")]
    pub reconnection: Box<dyn ReconnectionPolicy>,
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        let parsed = url::Url::parse(url).map_err(|e| {
            Error::BadConfigError(format!("Failed to parse Cassandra URL: {}", e))
        })?;

        if parsed.scheme() != "cassandra" {
            return Err(Error::BadConfigError(format!(
                "Invalid URL scheme '{}', expected 'cassandra'",
                parsed.scheme()
            )));
        }

        let host = match parsed.host() {
            Some(url::Host::Ipv4(addr)) => Host::Addr(IpAddr::V4(addr)),
            Some(url::Host::Ipv6(addr)) => Host::Addr(IpAddr::V6(addr)),
            Some(url::Host::Domain(name)) => Host::Name(name.to_string()),
            None => {
                return Err(Error::BadConfigError(
                    "Missing host in Cassandra URL".to_string(),
                ));
            }
        };

        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        // Keyspace from the path, like a database name
        let keyspace = parsed
            .path()
            .strip_prefix('/')
            .filter(|keyspace| !keyspace.is_empty())
            .map(ToString::to_string);

        Ok(Self {
            host,
            port,
            keyspace,
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let opts = Opts::default();
        assert_eq!(opts.host, Host::Addr(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(opts.port, 9042);
        assert_eq!(opts.connect_timeout, Duration::from_millis(5_000));
        assert_eq!(opts.response_timeout, None);
        assert!(opts.async_init);
        assert!(opts.keyspace.is_none());
    }

    #[test]
    fn url_with_keyspace() {
        let opts = Opts::try_from("cassandra://10.20.0.3:9043/metrics").unwrap();
        assert_eq!(opts.host, Host::Addr("10.20.0.3".parse().unwrap()));
        assert_eq!(opts.port, 9043);
        assert_eq!(opts.keyspace.as_deref(), Some("metrics"));
    }

    #[test]
    fn url_defaults_port_and_keyspace() {
        let opts = Opts::try_from("cassandra://db.internal").unwrap();
        assert_eq!(opts.host, Host::Name(String::from("db.internal")));
        assert_eq!(opts.port, DEFAULT_PORT);
        assert_eq!(opts.keyspace, None);
    }

    #[test]
    fn url_scheme_is_checked() {
        assert!(matches!(
            Opts::try_from("postgres://localhost"),
            Err(Error::BadConfigError(_))
        ));
    }
}
