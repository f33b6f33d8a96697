//! An instrumented HTTP/1.1 client transport.
//!
//! Every lifecycle point of a request (connection acquisition, DNS, TCP connect, TLS,
//! header writes, informational responses, pool return) is reported to a
//! [`ClientTrace`] as it happens.

mod conn;
mod dial;
pub mod error;
mod http1;
pub mod pool;
pub mod proxy;
mod tls;

use std::fmt;
use std::time::Duration;

use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

use crate::error::{ConntraceError, Result};
use crate::trace::ClientTrace;
use conn::{Conn, Stream};
use pool::IdlePool;

pub use error::{TimeoutPhase, TransportError, TransportErrorKind};
pub use pool::PutIdleError;
pub use proxy::{ProxyConfig, ProxyServer};

pub const DEFAULT_USER_AGENT: &str = concat!("conntrace/", env!("CARGO_PKG_VERSION"));

/// Limits and pooling behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bounds DNS resolution and each TCP connect, and CONNECT tunnel setup
    pub connect_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    /// How long a pooled connection may sit unused
    pub idle_timeout: Duration,
    /// From the end of the request write to the final response head
    pub response_header_timeout: Duration,
    pub expect_continue_timeout: Duration,
    /// Whole round trip
    pub request_timeout: Duration,
    pub max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let ten = Duration::from_secs(10);
        Self {
            connect_timeout: ten,
            tls_handshake_timeout: ten,
            idle_timeout: ten,
            response_header_timeout: ten,
            expect_continue_timeout: ten,
            request_timeout: ten,
            max_idle_per_host: 2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A request to send. Only `http` and `https` URLs are accepted.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn expects_continue(&self) -> bool {
        self.headers
            .get_all(http::header::EXPECT)
            .iter()
            .any(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }

    pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A response whose body has been drained.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    /// Body bytes read off the wire, after any chunk framing
    pub body_len: u64,
}

/// Pool key: scheme, host and port of a request URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub https: bool,
    pub host: Host<String>,
    pub port: u16,
}

impl Origin {
    pub fn parse(url: &Url) -> std::result::Result<Self, TransportError> {
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(TransportError::Protocol(format!("unsupported scheme {other:?}"))),
        };
        let host = url
            .host()
            .map(|host| host.to_owned())
            .ok_or_else(|| TransportError::Protocol(format!("url {url} has no host")))?;
        let port = url.port_or_known_default().unwrap_or(if https { 443 } else { 80 });
        Ok(Self { https, host, port })
    }

    /// `host:port`, with brackets around IPv6 hosts.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for the `Host` header: the port is left off when it is the scheme default.
    pub fn authority(&self) -> String {
        let default = if self.https { 443 } else { 80 };
        if self.port == default {
            self.host.to_string()
        } else {
            self.host_port()
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}://{}", if self.https { "https" } else { "http" }, self.host_port())
    }
}

/// HTTP/1.1 client with a keep-alive pool. One request at a time.
pub struct Transport {
    config: TransportConfig,
    proxy: ProxyConfig,
    tls: tokio_rustls::TlsConnector,
    pool: IdlePool,
}

impl Transport {
    pub fn new(config: TransportConfig, proxy: ProxyConfig) -> Result<Self> {
        let tls = tls::connector().map_err(|e| ConntraceError::Config(format!("tls setup failed: {e}")))?;
        if !proxy.is_direct() {
            info!("transport will honour proxy settings from the environment");
        }
        let pool = IdlePool::new(config.max_idle_per_host, config.idle_timeout);
        Ok(Self {
            config,
            proxy,
            tls,
            pool,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    pub fn close_idle_connections(&mut self) {
        self.pool.clear();
    }

    /// Send `request`, reporting each lifecycle step to `trace`.
    ///
    /// The response body is read to the end before returning so the connection can be
    /// pooled. Cancelling `cancel` or exceeding the request timeout abandons the
    /// in-flight connection.
    pub async fn round_trip(
        &mut self,
        request: &Request,
        trace: &mut dyn ClientTrace,
        cancel: &CancellationToken,
    ) -> std::result::Result<Response, TransportError> {
        let limit = self.config.request_timeout;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(limit, self.send(request, trace)) => {
                result.unwrap_or_else(|_| Err(TransportError::timeout(TimeoutPhase::Request, limit)))
            }
        }
    }

    async fn send(&mut self, request: &Request, trace: &mut dyn ClientTrace) -> std::result::Result<Response, TransportError> {
        let origin = Origin::parse(&request.url)?;
        trace.get_conn(&origin.host_port());

        let mut conn = match self.pool.checkout(&origin) {
            Some(conn) => {
                debug!("reusing idle connection to {}", origin);
                trace.got_conn(&conn.info(true));
                conn
            }
            None => {
                let conn = self.dial(&origin, trace).await?;
                trace.got_conn(&conn.info(false));
                conn
            }
        };
        conn.mark_active();

        let exchange = http1::exchange(&mut conn, request, &origin, &self.config, trace).await?;
        let verdict = exchange.reuse.and_then(|()| self.pool.put(origin, conn));
        match verdict {
            Ok(()) => trace.put_idle_conn(None),
            Err(err) => {
                debug!("connection not pooled: {}", err);
                trace.put_idle_conn(Some(&err));
            }
        }
        Ok(exchange.response)
    }

    async fn dial(&self, origin: &Origin, trace: &mut dyn ClientTrace) -> std::result::Result<Conn, TransportError> {
        let limit = self.config.connect_timeout;
        let Some(proxy) = self.proxy.proxy_for(origin) else {
            let tcp = dial::connect_tcp(&origin.host, origin.port, limit, trace).await?;
            return self.secure(tcp, origin, false, trace).await;
        };

        debug!("dialing {} via proxy {}", origin, proxy);
        let mut tcp = dial::connect_tcp(&proxy.host, proxy.port, limit, trace).await?;
        if origin.https {
            dial::establish_tunnel(&mut tcp, proxy, &origin.host_port(), limit).await?;
            self.secure(tcp, origin, true, trace).await
        } else {
            Ok(Conn::forwarding(tcp, proxy.authorization.clone()))
        }
    }

    async fn secure(
        &self,
        tcp: tokio::net::TcpStream,
        origin: &Origin,
        proxied: bool,
        trace: &mut dyn ClientTrace,
    ) -> std::result::Result<Conn, TransportError> {
        if !origin.https {
            return Ok(Conn::new(Stream::Plain(tcp), proxied));
        }
        let tls = tls::handshake(&self.tls, tcp, &origin.host, self.config.tls_handshake_timeout, trace).await?;
        Ok(Conn::new(Stream::Tls(Box::new(tls)), proxied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_parse_and_authority() {
        let origin = Origin::parse(&Url::parse("https://update.traefik.io/repos").unwrap()).unwrap();
        assert!(origin.https);
        assert_eq!(origin.port, 443);
        assert_eq!(origin.host_port(), "update.traefik.io:443");
        assert_eq!(origin.authority(), "update.traefik.io");

        let origin = Origin::parse(&Url::parse("http://[::1]:8080/").unwrap()).unwrap();
        assert_eq!(origin.host_port(), "[::1]:8080");
        assert_eq!(origin.authority(), "[::1]:8080");
        assert_eq!(origin.to_string(), "http://[::1]:8080");
    }

    #[test]
    fn test_origin_rejects_other_schemes() {
        let err = Origin::parse(&Url::parse("ftp://example.com/").unwrap()).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_expects_continue() {
        let url = Url::parse("http://example.com/").unwrap();
        assert!(!Request::get(url.clone()).expects_continue());
        let request = Request::new(Method::PUT, url).header(http::header::EXPECT, HeaderValue::from_static("100-Continue"));
        assert!(request.expects_continue());
    }

    #[test]
    fn test_default_config_timeouts() {
        let config = TransportConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_idle_per_host, 2);
        assert!(config.user_agent.starts_with("conntrace/"));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let mut transport = Transport::new(TransportConfig::default(), ProxyConfig::none()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = Request::get(Url::parse("http://127.0.0.1:9/").unwrap());
        let mut trace = crate::trace::NoopTrace;
        let err = transport.round_trip(&request, &mut trace, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
