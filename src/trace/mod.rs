//! Lifecycle instrumentation for a single HTTP request.
//!
//! The transport calls one [`ClientTrace`] method per lifecycle point, in the order
//! the events happen. Every method defaults to a no-op so an implementation only
//! overrides what it cares about.

pub mod buffered;
pub mod logging;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;

use http::HeaderMap;

use crate::domain::{ConnInfo, TlsState};

pub use buffered::BufferedClientTrace;
pub use logging::LogTrace;

/// Error handed to a hook, if the observed step failed.
pub type HookError<'a> = Option<&'a (dyn Error + 'static)>;

/// Hooks fired by the transport during one request.
///
/// Hooks must not block. They may be invoked zero or more times in whatever order
/// the transport produces.
pub trait ClientTrace: Send {
    /// Connection acquisition begins for `host_port`.
    fn get_conn(&mut self, _host_port: &str) {}

    /// A new or pooled connection was obtained.
    fn got_conn(&mut self, _info: &ConnInfo) {}

    /// The connection went back to the idle pool, or `err` says why it did not.
    fn put_idle_conn(&mut self, _err: HookError<'_>) {}

    fn got_first_response_byte(&mut self) {}

    /// `100 Continue` arrived while the request body was held back.
    fn got_100_continue(&mut self) {}

    /// A non-terminal informational response arrived.
    ///
    /// Returning `Break` aborts the request with the given reason.
    fn got_1xx_response(&mut self, _code: u16, _header: &HeaderMap) -> ControlFlow<String> {
        ControlFlow::Continue(())
    }

    fn dns_start(&mut self, _host: &str) {}

    fn dns_done(&mut self, _addrs: &[IpAddr], _err: HookError<'_>) {}

    fn connect_start(&mut self, _network: &str, _addr: SocketAddr) {}

    fn connect_done(&mut self, _network: &str, _addr: SocketAddr, _err: HookError<'_>) {}

    fn tls_handshake_start(&mut self) {}

    fn tls_handshake_done(&mut self, _state: Option<&TlsState>, _err: HookError<'_>) {}

    /// One request header field was serialized.
    fn wrote_header_field(&mut self, _key: &str, _value: &[String]) {}

    fn wrote_headers(&mut self) {}

    fn wait_100_continue(&mut self) {}

    fn wrote_request(&mut self, _err: HookError<'_>) {}
}

/// Observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;

impl ClientTrace for NoopTrace {}

/// Forwards every event to two traces, `primary` first.
pub struct ComposedTrace<'a> {
    primary: &'a mut dyn ClientTrace,
    secondary: &'a mut dyn ClientTrace,
}

impl<'a> ComposedTrace<'a> {
    pub fn new(primary: &'a mut dyn ClientTrace, secondary: &'a mut dyn ClientTrace) -> Self {
        Self { primary, secondary }
    }
}

impl ClientTrace for ComposedTrace<'_> {
    fn get_conn(&mut self, host_port: &str) {
        self.primary.get_conn(host_port);
        self.secondary.get_conn(host_port);
    }

    fn got_conn(&mut self, info: &ConnInfo) {
        self.primary.got_conn(info);
        self.secondary.got_conn(info);
    }

    fn put_idle_conn(&mut self, err: HookError<'_>) {
        self.primary.put_idle_conn(err);
        self.secondary.put_idle_conn(err);
    }

    fn got_first_response_byte(&mut self) {
        self.primary.got_first_response_byte();
        self.secondary.got_first_response_byte();
    }

    fn got_100_continue(&mut self) {
        self.primary.got_100_continue();
        self.secondary.got_100_continue();
    }

    fn got_1xx_response(&mut self, code: u16, header: &HeaderMap) -> ControlFlow<String> {
        let primary = self.primary.got_1xx_response(code, header);
        let secondary = self.secondary.got_1xx_response(code, header);
        match primary {
            ControlFlow::Break(reason) => ControlFlow::Break(reason),
            ControlFlow::Continue(()) => secondary,
        }
    }

    fn dns_start(&mut self, host: &str) {
        self.primary.dns_start(host);
        self.secondary.dns_start(host);
    }

    fn dns_done(&mut self, addrs: &[IpAddr], err: HookError<'_>) {
        self.primary.dns_done(addrs, err);
        self.secondary.dns_done(addrs, err);
    }

    fn connect_start(&mut self, network: &str, addr: SocketAddr) {
        self.primary.connect_start(network, addr);
        self.secondary.connect_start(network, addr);
    }

    fn connect_done(&mut self, network: &str, addr: SocketAddr, err: HookError<'_>) {
        self.primary.connect_done(network, addr, err);
        self.secondary.connect_done(network, addr, err);
    }

    fn tls_handshake_start(&mut self) {
        self.primary.tls_handshake_start();
        self.secondary.tls_handshake_start();
    }

    fn tls_handshake_done(&mut self, state: Option<&TlsState>, err: HookError<'_>) {
        self.primary.tls_handshake_done(state, err);
        self.secondary.tls_handshake_done(state, err);
    }

    fn wrote_header_field(&mut self, key: &str, value: &[String]) {
        self.primary.wrote_header_field(key, value);
        self.secondary.wrote_header_field(key, value);
    }

    fn wrote_headers(&mut self) {
        self.primary.wrote_headers();
        self.secondary.wrote_headers();
    }

    fn wait_100_continue(&mut self) {
        self.primary.wait_100_continue();
        self.secondary.wait_100_continue();
    }

    fn wrote_request(&mut self, err: HookError<'_>) {
        self.primary.wrote_request(err);
        self.secondary.wrote_request(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StageKind;

    struct Objecting;

    impl ClientTrace for Objecting {
        fn got_1xx_response(&mut self, code: u16, _header: &HeaderMap) -> ControlFlow<String> {
            ControlFlow::Break(format!("refusing {code}"))
        }
    }

    #[test]
    fn test_noop_trace_never_objects() {
        let mut trace = NoopTrace;
        assert_eq!(trace.got_1xx_response(103, &HeaderMap::new()), ControlFlow::Continue(()));
    }

    #[test]
    fn test_composed_trace_feeds_both_sides_in_order() {
        let mut first = BufferedClientTrace::new();
        let mut second = BufferedClientTrace::new();
        {
            let mut composed = ComposedTrace::new(&mut first, &mut second);
            composed.get_conn("example.com:443");
            composed.tls_handshake_start();
            composed.wrote_headers();
        }

        let expected = vec![StageKind::GetConn, StageKind::TlsHandshakeStart, StageKind::WriteHeaders];
        let kinds = |trace: &BufferedClientTrace| trace.timeline().iter().map(|s| s.kind()).collect::<Vec<_>>();
        assert_eq!(kinds(&first), expected);
        assert_eq!(kinds(&second), expected);
    }

    #[test]
    fn test_composed_trace_objection_from_either_side_wins() {
        let mut recorder = BufferedClientTrace::new();
        let mut objecting = Objecting;
        let mut composed = ComposedTrace::new(&mut recorder, &mut objecting);
        assert_eq!(
            composed.got_1xx_response(103, &HeaderMap::new()),
            ControlFlow::Break("refusing 103".to_string())
        );
        drop(composed);
        assert_eq!(recorder.timeline().len(), 1);
    }
}
