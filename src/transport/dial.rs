use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use url::Host;

use super::error::{TimeoutPhase, TransportError};
use super::proxy::ProxyServer;
use crate::trace::ClientTrace;

const NETWORK: &str = "tcp";
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Resolve `host` unless it is an IP literal, then try each address in order.
pub(crate) async fn connect_tcp(
    host: &Host<String>,
    port: u16,
    limit: Duration,
    trace: &mut dyn ClientTrace,
) -> Result<TcpStream, TransportError> {
    let addrs = resolve(host, port, limit, trace).await?;
    let mut last_err = None;
    for addr in addrs {
        trace.connect_start(NETWORK, addr);
        match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                trace.connect_done(NETWORK, addr, None);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay on {} failed: {}", addr, e);
                }
                return Ok(stream);
            }
            Ok(Err(source)) => {
                trace.connect_done(NETWORK, addr, Some(&source));
                last_err = Some(TransportError::Connect { addr, source });
            }
            Err(_) => {
                let err = TransportError::timeout(TimeoutPhase::Connect, limit);
                trace.connect_done(NETWORK, addr, Some(&err));
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| TransportError::NoAddresses { host: host.to_string() }))
}

async fn resolve(
    host: &Host<String>,
    port: u16,
    limit: Duration,
    trace: &mut dyn ClientTrace,
) -> Result<Vec<SocketAddr>, TransportError> {
    let name = match host {
        Host::Ipv4(ip) => return Ok(vec![SocketAddr::new(IpAddr::V4(*ip), port)]),
        Host::Ipv6(ip) => return Ok(vec![SocketAddr::new(IpAddr::V6(*ip), port)]),
        Host::Domain(name) => name.as_str(),
    };

    trace.dns_start(name);
    match tokio::time::timeout(limit, lookup_host((name, port))).await {
        Ok(Ok(found)) => {
            let mut addrs: Vec<SocketAddr> = Vec::new();
            for addr in found {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
            let ips: Vec<IpAddr> = addrs.iter().map(SocketAddr::ip).collect();
            if addrs.is_empty() {
                let err = TransportError::NoAddresses { host: name.to_string() };
                trace.dns_done(&ips, Some(&err));
                return Err(err);
            }
            trace.dns_done(&ips, None);
            Ok(addrs)
        }
        Ok(Err(source)) => {
            trace.dns_done(&[], Some(&source));
            Err(TransportError::Dns {
                host: name.to_string(),
                source,
            })
        }
        Err(_) => {
            let err = TransportError::timeout(TimeoutPhase::Dns, limit);
            trace.dns_done(&[], Some(&err));
            Err(err)
        }
    }
}

/// Ask `proxy` to open a tunnel to `target` (`host:port`) over `tcp`.
pub(crate) async fn establish_tunnel(
    tcp: &mut TcpStream,
    proxy: &ProxyServer,
    target: &str,
    limit: Duration,
) -> Result<(), TransportError> {
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(auth) = &proxy.authorization {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");

    let proxy_failed = |message: String| TransportError::Proxy {
        proxy: proxy.to_string(),
        message,
    };
    tcp.write_all(request.as_bytes())
        .await
        .map_err(|e| proxy_failed(format!("sending CONNECT: {e}")))?;

    let status = match tokio::time::timeout(limit, read_connect_status(tcp)).await {
        Ok(result) => result.map_err(proxy_failed)?,
        Err(_) => return Err(TransportError::timeout(TimeoutPhase::Connect, limit)),
    };
    if !(200..300).contains(&status) {
        return Err(TransportError::ProxyRefused {
            proxy: proxy.to_string(),
            status,
        });
    }
    debug!("tunnel to {} via {} established", target, proxy);
    Ok(())
}

async fn read_connect_status(tcp: &mut TcpStream) -> Result<u16, String> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0_u8; 512];
    loop {
        let n = tcp.read(&mut chunk).await.map_err(|e| format!("reading CONNECT response: {e}"))?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).to_string());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => return Ok(response.code.unwrap_or_default()),
            Ok(httparse::Status::Partial) if buf.len() > MAX_CONNECT_RESPONSE => {
                return Err("CONNECT response head too large".to_string());
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(format!("invalid CONNECT response: {e}")),
        }
    }
}
