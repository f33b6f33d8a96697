use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;

use http::HeaderMap;
use log::debug;

use super::{ClientTrace, HookError};
use crate::domain::{ConnInfo, TlsState};

/// Mirrors lifecycle events to the `log` facade at debug level.
#[derive(Debug, Clone, Copy)]
pub struct LogTrace {
    attempt: u64,
}

impl LogTrace {
    pub fn new(attempt: u64) -> Self {
        Self { attempt }
    }
}

fn err_text(err: HookError<'_>) -> String {
    err.map_or_else(|| "ok".to_string(), ToString::to_string)
}

impl ClientTrace for LogTrace {
    fn get_conn(&mut self, host_port: &str) {
        debug!("attempt {}: GetConn {}", self.attempt, host_port);
    }

    fn got_conn(&mut self, info: &ConnInfo) {
        debug!(
            "attempt {}: GotConn reused={} idle={:?} remote={:?}",
            self.attempt, info.reused, info.idle_time, info.remote_addr
        );
    }

    fn put_idle_conn(&mut self, err: HookError<'_>) {
        debug!("attempt {}: PutIdleConn {}", self.attempt, err_text(err));
    }

    fn got_first_response_byte(&mut self) {
        debug!("attempt {}: GotFirstResponseByte", self.attempt);
    }

    fn got_100_continue(&mut self) {
        debug!("attempt {}: Got100Continue", self.attempt);
    }

    fn got_1xx_response(&mut self, code: u16, header: &HeaderMap) -> ControlFlow<String> {
        debug!("attempt {}: Got1xxResponse {} ({} headers)", self.attempt, code, header.len());
        ControlFlow::Continue(())
    }

    fn dns_start(&mut self, host: &str) {
        debug!("attempt {}: DNSStart {}", self.attempt, host);
    }

    fn dns_done(&mut self, addrs: &[IpAddr], err: HookError<'_>) {
        debug!("attempt {}: DNSDone {:?} {}", self.attempt, addrs, err_text(err));
    }

    fn connect_start(&mut self, network: &str, addr: SocketAddr) {
        debug!("attempt {}: ConnectStart {} {}", self.attempt, network, addr);
    }

    fn connect_done(&mut self, network: &str, addr: SocketAddr, err: HookError<'_>) {
        debug!("attempt {}: ConnectDone {} {} {}", self.attempt, network, addr, err_text(err));
    }

    fn tls_handshake_start(&mut self) {
        debug!("attempt {}: TLSHandshakeStart", self.attempt);
    }

    fn tls_handshake_done(&mut self, state: Option<&TlsState>, err: HookError<'_>) {
        let version = state.and_then(|s| s.version.as_deref()).unwrap_or("-");
        debug!("attempt {}: TLSHandshakeDone {} {}", self.attempt, version, err_text(err));
    }

    fn wrote_header_field(&mut self, key: &str, value: &[String]) {
        debug!("attempt {}: WriteHeaderField {}: {:?}", self.attempt, key, value);
    }

    fn wrote_headers(&mut self) {
        debug!("attempt {}: WriteHeaders", self.attempt);
    }

    fn wait_100_continue(&mut self) {
        debug!("attempt {}: Wait100Continue", self.attempt);
    }

    fn wrote_request(&mut self, err: HookError<'_>) {
        debug!("attempt {}: WroteRequest {}", self.attempt, err_text(err));
    }
}
