use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::domain::ConnInfo;

const READ_CHUNK: usize = 8 * 1024;

/// Socket with or without TLS on top.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(tls) => tls.get_ref().0,
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An established HTTP/1.1 connection plus its buffered unread bytes.
pub(crate) struct Conn {
    stream: Stream,
    pub(crate) read_buf: BytesMut,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    proxied: bool,
    /// Plain-HTTP forwarding through a proxy: absolute-form targets, optional credentials
    pub(crate) forward_proxy: Option<ForwardProxy>,
    idle_since: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ForwardProxy {
    pub(crate) authorization: Option<String>,
}

impl Conn {
    pub(crate) fn new(stream: Stream, proxied: bool) -> Self {
        let tcp = stream.tcp();
        let local_addr = tcp.local_addr().ok();
        let remote_addr = tcp.peer_addr().ok();
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            local_addr,
            remote_addr,
            proxied,
            forward_proxy: None,
            idle_since: None,
        }
    }

    pub(crate) fn forwarding(tcp: TcpStream, authorization: Option<String>) -> Self {
        let mut conn = Self::new(Stream::Plain(tcp), true);
        conn.forward_proxy = Some(ForwardProxy { authorization });
        conn
    }

    pub(crate) fn is_tls(&self) -> bool {
        matches!(self.stream, Stream::Tls(_))
    }

    pub(crate) fn info(&self, reused: bool) -> ConnInfo {
        ConnInfo {
            reused,
            was_idle: self.idle_since.is_some(),
            idle_time: self.idle_for(),
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
            tls: self.is_tls(),
            proxied: self.proxied,
        }
    }

    pub(crate) fn mark_idle(&mut self) {
        self.idle_since = Some(Instant::now());
    }

    pub(crate) fn mark_active(&mut self) {
        self.idle_since = None;
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.idle_since.map(|since| since.elapsed()).unwrap_or_default()
    }

    /// Best-effort check for a peer that hung up while the connection sat idle.
    ///
    /// Any readable byte on an idle connection disqualifies it. On TLS the probe goes
    /// through the session, so a `close_notify` reads as EOF while session tickets are
    /// absorbed without surfacing.
    pub(crate) fn looks_closed(&mut self) -> bool {
        if !self.read_buf.is_empty() {
            return true;
        }
        let mut probe = [0_u8; 1];
        let ready = match &mut self.stream {
            Stream::Plain(tcp) => tcp.peek(&mut probe).now_or_never(),
            Stream::Tls(tls) => tls.read(&mut probe).now_or_never(),
        };
        ready.is_some()
    }

    /// Read more bytes into `read_buf`. Returns 0 on EOF.
    pub(crate) async fn fill(&mut self) -> io::Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < READ_CHUNK / 2 {
            self.read_buf.reserve(READ_CHUNK);
        }
        self.stream.read_buf(&mut self.read_buf).await
    }

    pub(crate) async fn write_flush(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }
}
