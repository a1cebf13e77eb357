// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Helpers shared by the server integration tests: a blocking HTTP client
//! small enough to audit, built directly on `std::net::TcpStream`.

use std::{
    io::{Read, Write},
    net::TcpStream,
    thread,
    time::Duration,
};

//==============================================================================
// Constants & Structures
//==============================================================================

/// A fully read client-side response.
pub struct ClientResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [ClientResponse].
impl ClientResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends on drop, so a panicking client thread still releases the server
/// side of the test instead of hanging it.
pub struct DoneGuard(pub crossbeam_channel::Sender<()>);

/// Drop trait implementation for [DoneGuard].
impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Asserts the server side is gone: EOF or a reset both qualify.
pub fn expect_closed(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) | Err(_) => (),
        Ok(n) => panic!("expected closed connection, read {} bytes", n),
    }
}

/// Connects to the test server, retrying while it comes up.
pub fn connect(port: u16) -> TcpStream {
    let addr = format!("127.0.0.1:{}", port);
    for _ in 0..250 {
        match TcpStream::connect(&addr) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(Duration::from_secs(10)))
                    .expect("set_read_timeout");
                stream.set_nodelay(true).expect("set_nodelay");
                return stream;
            }
            Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
    panic!("server did not come up on {}", addr);
}

/// Reads exactly one response off the stream, honoring Content-Length or
/// chunked framing.
pub fn read_response(stream: &mut TcpStream) -> ClientResponse {
    let head = read_until_blank_line(stream);
    let text = String::from_utf8(head).expect("response head is not UTF-8");
    let mut lines = text.split("\r\n");
    let status_line = lines.next().expect("missing status line");
    let mut status_parts = status_line.splitn(3, ' ');
    assert_eq!(status_parts.next(), Some("HTTP/1.1"));
    let status: u16 = status_parts
        .next()
        .expect("missing status code")
        .parse()
        .expect("status code is not a number");

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let colon = line.find(':').expect("malformed response header");
        headers.push((
            line[..colon].to_string(),
            line[colon + 1..].trim().to_string(),
        ));
    }

    let response = ClientResponse { status, headers, body: Vec::new() };
    let body = if response
        .header("Transfer-Encoding")
        .map(|v| v.contains("chunked"))
        .unwrap_or(false)
    {
        read_chunked_body(stream)
    } else {
        let length: usize = response
            .header("Content-Length")
            .map(|v| v.parse().expect("bad content length"))
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).expect("short response body");
        body
    };
    ClientResponse { body, ..response }
}

/// Asserts the server closes the connection: the next read reports EOF.
pub fn expect_eof(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => (),
        Ok(n) => panic!("expected EOF, read {} bytes", n),
        Err(e) => panic!("expected EOF, got error {}", e),
    }
}

pub fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).expect("client write failed");
}

fn read_until_blank_line(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).expect("read failed while reading head");
        assert!(n > 0, "connection closed while reading head");
        head.push(byte[0]);
        assert!(head.len() < 64 * 1024, "response head too large");
    }
    head.truncate(head.len() - 4);
    head
}

fn read_chunked_body(stream: &mut TcpStream) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let line = read_line(stream);
        let size = usize::from_str_radix(line.trim(), 16).expect("bad chunk size");
        if size == 0 {
            // Trailers end with a blank line.
            loop {
                if read_line(stream).is_empty() {
                    return body;
                }
            }
        }
        let mut chunk = vec![0u8; size];
        stream.read_exact(&mut chunk).expect("short chunk");
        body.extend_from_slice(&chunk);
        let delim = read_line(stream);
        assert!(delim.is_empty(), "missing chunk delimiter");
    }
}

fn read_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).expect("read failed while reading line");
        assert!(n > 0, "connection closed mid-line");
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).expect("line is not UTF-8")
}
