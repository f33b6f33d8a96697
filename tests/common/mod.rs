//! Canned HTTP/1.1 servers on std threads.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read one request (head plus `Content-Length` body). `None` on EOF.
pub fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = content_length(&head);
            if head.to_ascii_lowercase().contains("expect: 100-continue") && buf.len() == end + 4 {
                // caller drives the continue handshake
                return Some(String::from_utf8_lossy(&buf).into_owned());
            }
            while buf.len() < end + 4 + body_len {
                let n = stream.read(&mut chunk).ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Some(String::from_utf8_lossy(&buf).into_owned());
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

pub fn read_exact_body(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut body = vec![0_u8; len];
    stream.read_exact(&mut body).unwrap();
    body
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Serve `replies` in order, one per request, keeping each connection open until the
/// client closes it. Returns the requests seen once every reply has been sent.
pub fn canned_server(replies: Vec<&'static str>) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        let mut replies = replies.into_iter().peekable();
        while replies.peek().is_some() {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            while replies.peek().is_some() {
                let Some(request) = read_request(&mut stream) else {
                    break;
                };
                seen.push(request);
                let reply = replies.next().unwrap();
                stream.write_all(reply.as_bytes()).unwrap();
                stream.flush().unwrap();
                if reply.to_ascii_lowercase().contains("connection: close") {
                    break;
                }
            }
        }
        seen
    });
    (addr, handle)
}

/// Accept one connection, read the request and never answer.
pub fn silent_server(hold: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = read_request(&mut stream);
            thread::sleep(hold);
        }
    });
    addr
}

/// An address with nothing listening.
pub fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
