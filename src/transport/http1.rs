//! HTTP/1.1 request serialization and response parsing on a single connection.

use std::io;
use std::ops::ControlFlow;

use bytes::Buf;
use log::debug;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

use super::conn::Conn;
use super::error::{TimeoutPhase, TransportError};
use super::pool::PutIdleError;
use super::{Origin, Request, Response, TransportConfig};
use crate::trace::ClientTrace;

/// Informational responses tolerated before the final one.
pub(crate) const MAX_INFORMATIONAL: usize = 5;
const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_LINE_BYTES: usize = 8 * 1024;
/// Largest content-length or single chunk accepted.
pub(crate) const MAX_DECLARED_BODY: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: u16,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1
    pub(crate) minor: u8,
    pub(crate) headers: HeaderMap,
}

impl ResponseHead {
    fn is_informational(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

/// A finished exchange plus whether the connection may be reused.
pub(crate) struct Exchange {
    pub(crate) response: Response,
    pub(crate) reuse: Result<(), PutIdleError>,
}

/// The request header fields in wire order.
pub(crate) fn header_fields(
    request: &Request,
    origin: &Origin,
    proxy_authorization: Option<&str>,
    user_agent: &str,
) -> Vec<(String, Vec<String>)> {
    let text = |value: &HeaderValue| String::from_utf8_lossy(value.as_bytes()).into_owned();
    let values = |name: &HeaderName| request.headers.get_all(name).iter().map(text).collect::<Vec<_>>();

    let mut fields = Vec::with_capacity(request.headers.keys_len() + 4);
    if request.headers.contains_key(HOST) {
        fields.push(("Host".to_string(), values(&HOST)));
    } else {
        fields.push(("Host".to_string(), vec![origin.authority()]));
    }
    if !request.headers.contains_key(USER_AGENT) && !user_agent.is_empty() {
        fields.push(("User-Agent".to_string(), vec![user_agent.to_string()]));
    }
    for name in request.headers.keys().filter(|name| *name != HOST) {
        fields.push((canonical(name.as_str()), values(name)));
    }
    if let Some(auth) = proxy_authorization {
        fields.push(("Proxy-Authorization".to_string(), vec![auth.to_string()]));
    }
    if let Some(body) = &request.body
        && !request.headers.contains_key(CONTENT_LENGTH)
    {
        fields.push(("Content-Length".to_string(), vec![body.len().to_string()]));
    }
    fields
}

/// `content-type` -> `Content-Type`
pub(crate) fn canonical(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Origin-form target, or absolute-form when talking to a forward proxy.
pub(crate) fn request_target(request: &Request, absolute: bool) -> String {
    if absolute {
        let mut url = request.url.clone();
        url.set_fragment(None);
        return url.to_string();
    }
    match request.url.query() {
        Some(query) => format!("{}?{}", request.url.path(), query),
        None => request.url.path().to_string(),
    }
}

/// Serialize the request head, firing one hook per header field and one for the end of headers.
fn encode_head(request: &Request, target: &str, fields: &[(String, Vec<String>)], trace: &mut dyn ClientTrace) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", request.method, target).as_bytes());
    for (key, values) in fields {
        for value in values {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        trace.wrote_header_field(key, values);
    }
    out.extend_from_slice(b"\r\n");
    trace.wrote_headers();
    out
}

/// Parse one response head from the front of `buf`. `Ok(None)` means more bytes are needed.
pub(crate) fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, TransportError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let consumed = match response.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(TransportError::Protocol(format!("invalid response head: {e}"))),
    };
    let status = response
        .code
        .ok_or_else(|| TransportError::Protocol("missing status code".to_string()))?;
    let mut map = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| TransportError::Protocol(format!("invalid header name {:?}: {e}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| TransportError::Protocol(format!("invalid value for header {name}: {e}")))?;
        map.append(name, value);
    }
    Ok(Some((
        ResponseHead {
            status,
            minor: response.version.unwrap_or(1),
            headers: map,
        },
        consumed,
    )))
}

fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

pub(crate) fn body_framing(method: &Method, head: &ResponseHead) -> Result<Framing, TransportError> {
    if *method == Method::HEAD || (100..200).contains(&head.status) || head.status == 204 || head.status == 304 {
        return Ok(Framing::Empty);
    }
    if head.headers.contains_key(TRANSFER_ENCODING) {
        let last = head
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .last();
        return Ok(match last {
            Some(token) if token.eq_ignore_ascii_case("chunked") => Framing::Chunked,
            _ => Framing::UntilClose,
        });
    }
    let mut length: Option<u64> = None;
    for value in head.headers.get_all(CONTENT_LENGTH) {
        for part in value.to_str().unwrap_or("").split(',') {
            let parsed = part
                .trim()
                .parse::<u64>()
                .map_err(|_| TransportError::Protocol(format!("invalid content-length {value:?}")))?;
            if parsed > MAX_DECLARED_BODY {
                return Err(TransportError::Protocol(format!("content-length {parsed} exceeds limit")));
            }
            match length {
                Some(seen) if seen != parsed => {
                    return Err(TransportError::Protocol("conflicting content-length values".to_string()));
                }
                _ => length = Some(parsed),
            }
        }
    }
    Ok(match length {
        Some(0) => Framing::Empty,
        Some(n) => Framing::Length(n),
        None => Framing::UntilClose,
    })
}

/// Parse a chunk-size line, ignoring extensions.
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<u64, TransportError> {
    let text = std::str::from_utf8(line).map_err(|_| TransportError::Protocol("non-ascii chunk size".to_string()))?;
    let raw = text.split(';').next().unwrap_or("").trim();
    let size = u64::from_str_radix(raw, 16).map_err(|_| TransportError::Protocol(format!("invalid chunk size {raw:?}")))?;
    if size > MAX_DECLARED_BODY {
        return Err(TransportError::Protocol(format!("chunk size {raw:?} exceeds limit")));
    }
    Ok(size)
}

/// Whether the connection can carry another request after this response.
pub(crate) fn reuse_verdict(request: &Request, head: &ResponseHead, framing: Framing, body_sent: bool) -> Result<(), PutIdleError> {
    if !body_sent {
        return Err(PutIdleError::NotReusable("request body was not sent"));
    }
    if head.status == 101 {
        return Err(PutIdleError::NotReusable("protocol switched"));
    }
    if framing == Framing::UntilClose {
        return Err(PutIdleError::NotReusable("response body delimited by connection close"));
    }
    if has_token(&head.headers, CONNECTION, "close") {
        return Err(PutIdleError::NotReusable("server sent Connection: close"));
    }
    if has_token(&request.headers, CONNECTION, "close") {
        return Err(PutIdleError::NotReusable("request asked to close"));
    }
    if head.minor == 0 && !has_token(&head.headers, CONNECTION, "keep-alive") {
        return Err(PutIdleError::NotReusable("HTTP/1.0 response without keep-alive"));
    }
    Ok(())
}

fn eof(context: &str) -> TransportError {
    TransportError::Read(io::Error::new(io::ErrorKind::UnexpectedEof, context.to_string()))
}

/// Reads successive response heads, tracking first-byte and informational bookkeeping.
struct HeadReader {
    first_byte: bool,
    informational: usize,
}

impl HeadReader {
    fn new() -> Self {
        Self {
            first_byte: false,
            informational: 0,
        }
    }

    async fn next(&mut self, conn: &mut Conn, trace: &mut dyn ClientTrace) -> Result<ResponseHead, TransportError> {
        loop {
            if !conn.read_buf.is_empty() {
                if !self.first_byte {
                    self.first_byte = true;
                    trace.got_first_response_byte();
                }
                if let Some((head, consumed)) = parse_head(&conn.read_buf)? {
                    conn.read_buf.advance(consumed);
                    return Ok(head);
                }
                if conn.read_buf.len() > MAX_HEAD_BYTES {
                    return Err(TransportError::Protocol("response head too large".to_string()));
                }
            }
            let n = conn.fill().await.map_err(TransportError::Read)?;
            if n == 0 {
                return Err(eof(if self.first_byte {
                    "connection closed mid response head"
                } else {
                    "server closed connection before responding"
                }));
            }
        }
    }

    fn informational(&mut self, head: &ResponseHead, trace: &mut dyn ClientTrace) -> Result<(), TransportError> {
        self.informational += 1;
        if self.informational > MAX_INFORMATIONAL {
            return Err(TransportError::Protocol("too many 1xx informational responses".to_string()));
        }
        match trace.got_1xx_response(head.status, &head.headers) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(reason) => Err(TransportError::Aborted(reason)),
        }
    }

    /// While the body is held back: `None` once `100 Continue` arrives, or the final head
    /// if the server answered without waiting for the body.
    async fn await_continue(&mut self, conn: &mut Conn, trace: &mut dyn ClientTrace) -> Result<Option<ResponseHead>, TransportError> {
        loop {
            let head = self.next(conn, trace).await?;
            if head.status == 100 {
                trace.got_100_continue();
                self.informational(&head, trace)?;
                return Ok(None);
            }
            if head.is_informational() {
                self.informational(&head, trace)?;
                continue;
            }
            return Ok(Some(head));
        }
    }

    async fn final_head(&mut self, conn: &mut Conn, trace: &mut dyn ClientTrace) -> Result<ResponseHead, TransportError> {
        loop {
            let head = self.next(conn, trace).await?;
            if head.is_informational() {
                self.informational(&head, trace)?;
                continue;
            }
            return Ok(head);
        }
    }
}

async fn read_line(conn: &mut Conn) -> Result<Vec<u8>, TransportError> {
    loop {
        if let Some(pos) = conn.read_buf.windows(2).position(|pair| pair == b"\r\n") {
            let line = conn.read_buf.split_to(pos).to_vec();
            conn.read_buf.advance(2);
            return Ok(line);
        }
        if conn.read_buf.len() > MAX_LINE_BYTES {
            return Err(TransportError::Protocol("chunk line too long".to_string()));
        }
        if conn.fill().await.map_err(TransportError::Read)? == 0 {
            return Err(eof("connection closed mid chunked body"));
        }
    }
}

async fn fill_to(conn: &mut Conn, len: usize, context: &str) -> Result<(), TransportError> {
    while conn.read_buf.len() < len {
        if conn.fill().await.map_err(TransportError::Read)? == 0 {
            return Err(eof(context));
        }
    }
    Ok(())
}

/// Consume exactly `len` bytes without keeping them.
async fn discard(conn: &mut Conn, mut len: u64, context: &str) -> Result<(), TransportError> {
    while len > 0 {
        if conn.read_buf.is_empty() && conn.fill().await.map_err(TransportError::Read)? == 0 {
            return Err(eof(context));
        }
        let take = conn.read_buf.len().min(usize::try_from(len).unwrap_or(usize::MAX));
        conn.read_buf.advance(take);
        len -= take as u64;
    }
    Ok(())
}

/// Drain the response body and return how many body bytes it carried.
pub(crate) async fn read_body(conn: &mut Conn, framing: Framing) -> Result<u64, TransportError> {
    match framing {
        Framing::Empty => Ok(0),
        Framing::Length(len) => {
            discard(conn, len, "connection closed before content-length bytes arrived").await?;
            Ok(len)
        }
        Framing::Chunked => {
            let mut total: u64 = 0;
            loop {
                let size = parse_chunk_size(&read_line(conn).await?)?;
                if size == 0 {
                    // trailers end with an empty line
                    while !read_line(conn).await?.is_empty() {}
                    return Ok(total);
                }
                discard(conn, size, "connection closed mid chunk").await?;
                fill_to(conn, 2, "connection closed mid chunk").await?;
                if &conn.read_buf[..2] != b"\r\n" {
                    return Err(TransportError::Protocol("chunk not terminated by CRLF".to_string()));
                }
                conn.read_buf.advance(2);
                total = total.saturating_add(size);
            }
        }
        Framing::UntilClose => {
            let mut total = conn.read_buf.len() as u64;
            conn.read_buf.clear();
            while conn.fill().await.map_err(TransportError::Read)? > 0 {
                total = total.saturating_add(conn.read_buf.len() as u64);
                conn.read_buf.clear();
            }
            Ok(total)
        }
    }
}

/// Send `request` on `conn` and read the full response.
pub(crate) async fn exchange(
    conn: &mut Conn,
    request: &Request,
    origin: &Origin,
    config: &TransportConfig,
    trace: &mut dyn ClientTrace,
) -> Result<Exchange, TransportError> {
    let forward = conn.forward_proxy.clone();
    let target = request_target(request, forward.is_some());
    let auth = forward.as_ref().and_then(|proxy| proxy.authorization.as_deref());
    let fields = header_fields(request, origin, auth, &config.user_agent);
    let mut wire = encode_head(request, &target, &fields, trace);

    let hold_body = request.body.is_some() && request.expects_continue();
    if let Some(body) = &request.body
        && !hold_body
    {
        wire.extend_from_slice(body);
    }
    if let Err(err) = conn.write_flush(&wire).await {
        trace.wrote_request(Some(&err));
        return Err(TransportError::Write(err));
    }

    let mut reader = HeadReader::new();
    let mut early: Option<ResponseHead> = None;
    if hold_body {
        trace.wait_100_continue();
        match tokio::time::timeout(config.expect_continue_timeout, reader.await_continue(conn, trace)).await {
            Ok(Ok(head)) => early = head,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                let waited = TransportError::timeout(TimeoutPhase::ExpectContinue, config.expect_continue_timeout);
                debug!("{}, sending body anyway", waited);
            }
        }
        if early.is_none()
            && let Some(body) = &request.body
            && let Err(err) = conn.write_flush(body).await
        {
            trace.wrote_request(Some(&err));
            return Err(TransportError::Write(err));
        }
    }
    trace.wrote_request(None);
    let body_sent = early.is_none();

    let head = match early {
        Some(head) => head,
        None => match tokio::time::timeout(config.response_header_timeout, reader.final_head(conn, trace)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::timeout(
                    TimeoutPhase::ResponseHeader,
                    config.response_header_timeout,
                ));
            }
        },
    };

    let framing = body_framing(&request.method, &head)?;
    let body_len = read_body(conn, framing).await?;
    let mut reuse = reuse_verdict(request, &head, framing, body_sent);
    if reuse.is_ok() && !conn.read_buf.is_empty() {
        reuse = Err(PutIdleError::NotReusable("unread bytes after response"));
    }

    let status = StatusCode::from_u16(head.status)
        .map_err(|_| TransportError::Protocol(format!("invalid status code {}", head.status)))?;
    let version = if head.minor == 0 { Version::HTTP_10 } else { Version::HTTP_11 };
    Ok(Exchange {
        response: Response {
            status,
            version,
            headers: head.headers,
            body_len,
        },
        reuse,
    })
}
