use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;

use http::HeaderMap;

use super::{ClientTrace, HookError};
use crate::domain::{ConnInfo, StagePayload, Timeline, TlsState};

/// Records every lifecycle event as one stage on an owned [`Timeline`].
///
/// Purely observational: it never objects to an informational response.
#[derive(Debug, Default)]
pub struct BufferedClientTrace {
    timeline: Timeline,
}

impl BufferedClientTrace {
    pub fn new() -> Self {
        Self {
            timeline: Timeline::new(),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn into_timeline(self) -> Timeline {
        self.timeline
    }

    fn record(&mut self, payload: StagePayload) {
        self.timeline.record(payload);
    }
}

fn describe(err: HookError<'_>) -> Option<String> {
    err.map(ToString::to_string)
}

/// Header map as name to values, lossily decoded.
pub(crate) fn header_fields(header: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in header {
        fields
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    fields
}

impl ClientTrace for BufferedClientTrace {
    fn get_conn(&mut self, host_port: &str) {
        self.record(StagePayload::GetConn {
            host_port: host_port.to_string(),
        });
    }

    fn got_conn(&mut self, info: &ConnInfo) {
        self.record(StagePayload::GotConn(info.clone()));
    }

    fn put_idle_conn(&mut self, err: HookError<'_>) {
        self.record(StagePayload::PutIdleConn { error: describe(err) });
    }

    fn got_first_response_byte(&mut self) {
        self.record(StagePayload::GotFirstResponseByte);
    }

    fn got_100_continue(&mut self) {
        self.record(StagePayload::Got100Continue);
    }

    fn got_1xx_response(&mut self, code: u16, header: &HeaderMap) -> ControlFlow<String> {
        self.record(StagePayload::Got1xxResponse {
            code,
            header: header_fields(header),
        });
        ControlFlow::Continue(())
    }

    fn dns_start(&mut self, host: &str) {
        self.record(StagePayload::DnsStart { host: host.to_string() });
    }

    fn dns_done(&mut self, addrs: &[IpAddr], err: HookError<'_>) {
        self.record(StagePayload::DnsDone {
            addrs: addrs.to_vec(),
            error: describe(err),
        });
    }

    fn connect_start(&mut self, network: &str, addr: SocketAddr) {
        self.record(StagePayload::ConnectStart {
            network: network.to_string(),
            addr: addr.to_string(),
        });
    }

    fn connect_done(&mut self, network: &str, addr: SocketAddr, err: HookError<'_>) {
        self.record(StagePayload::ConnectDone {
            network: network.to_string(),
            addr: addr.to_string(),
            error: describe(err),
        });
    }

    fn tls_handshake_start(&mut self) {
        self.record(StagePayload::TlsHandshakeStart);
    }

    fn tls_handshake_done(&mut self, state: Option<&TlsState>, err: HookError<'_>) {
        self.record(StagePayload::TlsHandshakeDone {
            state: state.cloned(),
            error: describe(err),
        });
    }

    fn wrote_header_field(&mut self, key: &str, value: &[String]) {
        self.record(StagePayload::WriteHeaderField {
            key: key.to_string(),
            value: value.to_vec(),
        });
    }

    fn wrote_headers(&mut self) {
        self.record(StagePayload::WriteHeaders);
    }

    fn wait_100_continue(&mut self) {
        self.record(StagePayload::Wait100Continue);
    }

    fn wrote_request(&mut self, err: HookError<'_>) {
        self.record(StagePayload::WroteRequest { error: describe(err) });
    }
}
