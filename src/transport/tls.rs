use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, HandshakeKind, RootCertStore};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use url::Host;

use super::error::{TimeoutPhase, TransportError};
use crate::domain::TlsState;
use crate::trace::ClientTrace;

/// Client config trusting the bundled web PKI roots and offering only `http/1.1`.
pub(crate) fn connector() -> Result<TlsConnector, rustls::Error> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsConnector::from(Arc::new(config)))
}

fn server_name(host: &Host<String>) -> Result<ServerName<'static>, TransportError> {
    match host {
        Host::Domain(name) => ServerName::try_from(name.clone()).map_err(|e| TransportError::Tls {
            server_name: name.clone(),
            message: e.to_string(),
        }),
        Host::Ipv4(ip) => Ok(ServerName::from(IpAddr::V4(*ip))),
        Host::Ipv6(ip) => Ok(ServerName::from(IpAddr::V6(*ip))),
    }
}

pub(crate) async fn handshake(
    connector: &TlsConnector,
    tcp: TcpStream,
    host: &Host<String>,
    limit: Duration,
    trace: &mut dyn ClientTrace,
) -> Result<TlsStream<TcpStream>, TransportError> {
    let name = server_name(host)?;
    let label = host.to_string();

    trace.tls_handshake_start();
    match tokio::time::timeout(limit, connector.connect(name, tcp)).await {
        Ok(Ok(stream)) => {
            let state = session_state(stream.get_ref().1, &label);
            trace.tls_handshake_done(Some(&state), None);
            Ok(stream)
        }
        Ok(Err(err)) => {
            trace.tls_handshake_done(None, Some(&err));
            Err(TransportError::Tls {
                server_name: label,
                message: err.to_string(),
            })
        }
        Err(_) => {
            let err = TransportError::timeout(TimeoutPhase::TlsHandshake, limit);
            trace.tls_handshake_done(None, Some(&err));
            Err(err)
        }
    }
}

fn session_state(conn: &ClientConnection, server_name: &str) -> TlsState {
    TlsState {
        version: conn.protocol_version().map(|version| format!("{version:?}")),
        cipher_suite: conn.negotiated_cipher_suite().map(|suite| format!("{:?}", suite.suite())),
        negotiated_protocol: conn
            .alpn_protocol()
            .map(|protocol| String::from_utf8_lossy(protocol).into_owned()),
        server_name: server_name.to_string(),
        did_resume: matches!(conn.handshake_kind(), Some(HandshakeKind::Resumed)),
        handshake_complete: !conn.is_handshaking(),
        peer_certificates: conn
            .peer_certificates()
            .map(|chain| chain.iter().map(|cert| fingerprint(cert.as_ref())).collect())
            .unwrap_or_default(),
    }
}

fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_builds_with_bundled_roots() {
        assert!(connector().is_ok());
    }

    #[test]
    fn test_server_name_accepts_domains_and_ips() {
        assert!(server_name(&Host::Domain("update.traefik.io".into())).is_ok());
        assert!(server_name(&Host::Ipv4("127.0.0.1".parse().unwrap())).is_ok());
        assert!(server_name(&Host::Ipv6("::1".parse().unwrap())).is_ok());
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
