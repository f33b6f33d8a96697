use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`TransportError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Proxy,
    Tls,
    Timeout,
    Write,
    Read,
    Protocol,
    Aborted,
    Cancelled,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Proxy => "proxy",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Write => "write",
            Self::Read => "read",
            Self::Protocol => "protocol",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Which bounded phase ran out of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeoutPhase {
    Dns,
    Connect,
    TlsHandshake,
    ExpectContinue,
    ResponseHeader,
    Request,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::TlsHandshake => "tls_handshake",
            Self::ExpectContinue => "expect_continue",
            Self::ResponseHeader => "response_header",
            Self::Request => "request",
        };
        formatter.write_str(text)
    }
}

/// Anything that stops a request from producing a usable response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dns lookup for {host} failed: {source}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dns lookup for {host} returned no addresses")]
    NoAddresses { host: String },
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("proxy {proxy} answered CONNECT with status {status}")]
    ProxyRefused { proxy: String, status: u16 },
    #[error("proxy {proxy} failed: {message}")]
    Proxy { proxy: String, message: String },
    #[error("tls handshake with {server_name} failed: {message}")]
    Tls { server_name: String, message: String },
    #[error("{phase} timeout after {}ms", .after.as_millis())]
    Timeout { phase: TimeoutPhase, after: Duration },
    #[error("writing request failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("reading response failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("request aborted by trace hook: {0}")]
    Aborted(String),
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Dns { .. } | Self::NoAddresses { .. } => TransportErrorKind::Dns,
            Self::Connect { .. } => TransportErrorKind::Connect,
            Self::ProxyRefused { .. } | Self::Proxy { .. } => TransportErrorKind::Proxy,
            Self::Tls { .. } => TransportErrorKind::Tls,
            Self::Timeout { .. } => TransportErrorKind::Timeout,
            Self::Write(_) => TransportErrorKind::Write,
            Self::Read(_) => TransportErrorKind::Read,
            Self::Protocol(_) => TransportErrorKind::Protocol,
            Self::Aborted(_) => TransportErrorKind::Aborted,
            Self::Cancelled => TransportErrorKind::Cancelled,
        }
    }

    pub fn timeout(phase: TimeoutPhase, after: Duration) -> Self {
        Self::Timeout { phase, after }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let dns = TransportError::NoAddresses {
            host: "example.invalid".into(),
        };
        assert_eq!(dns.kind(), TransportErrorKind::Dns);

        let refused = TransportError::ProxyRefused {
            proxy: "proxy:3128".into(),
            status: 407,
        };
        assert_eq!(refused.kind(), TransportErrorKind::Proxy);
        assert_eq!(TransportError::Cancelled.kind(), TransportErrorKind::Cancelled);
    }

    #[test]
    fn test_timeout_display() {
        let err = TransportError::timeout(TimeoutPhase::ResponseHeader, Duration::from_secs(10));
        assert_eq!(err.to_string(), "response_header timeout after 10000ms");
        assert_eq!(err.kind().as_str(), "timeout");

        let waited = TransportError::timeout(TimeoutPhase::ExpectContinue, Duration::from_millis(250));
        assert_eq!(waited.to_string(), "expect_continue timeout after 250ms");
    }

    #[test]
    fn test_connect_display_includes_addr() {
        let err = TransportError::Connect {
            addr: "127.0.0.1:9".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("connect to 127.0.0.1:9 failed"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(TransportError::Cancelled.is_cancelled());
        assert!(!TransportError::Protocol("bad".into()).is_cancelled());
    }
}
