// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{
    body::Body,
    headers::{header, HeaderMap},
    range,
};

use std::fmt;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Request methods. Unknown tokens are carried verbatim rather than rejected:
/// routing may still want to match on them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Connect,
    Trace,
    Other(String),
}

/// Protocol version as parsed from `HTTP/<major>.<minor>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// A parsed request head: everything up to the blank line, plus the raw
/// request target for byte-faithful re-serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub path: String,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub version: Version,
    pub headers: HeaderMap,
}

/// An inbound request handed to a handler. The body is lazy: no byte of it is
/// read off the wire until the handler (or the driver's drain) asks.
pub struct Request {
    head: RequestHead,
    params: Vec<(String, String)>,
    body: Body,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Method].
impl Method {
    /// Parses a method token verbatim.
    pub fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "PATCH" => Method::Patch,
            "OPTIONS" => Method::Options,
            "CONNECT" => Method::Connect,
            "TRACE" => Method::Trace,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
            Method::Other(token) => token,
        }
    }
}

/// Associate functions for [Version].
impl Version {
    pub const HTTP10: Version = Version { major: 1, minor: 0 };
    pub const HTTP11: Version = Version { major: 1, minor: 1 };

    /// HTTP/1.1 connections persist unless told otherwise; HTTP/1.0 ones
    /// close unless told otherwise.
    pub fn default_keep_alive(&self) -> bool {
        (self.major, self.minor) >= (1, 1)
    }
}

/// Associate functions for [Request].
impl Request {
    pub(crate) fn new(head: RequestHead, body: Body) -> Self {
        Self { head, params: Vec::new(), body }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// The raw request path, percent-encoding intact.
    pub fn path(&self) -> &str {
        &self.head.path
    }

    /// Percent-decoded path segments.
    pub fn segments(&self) -> &[String] {
        &self.head.segments
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.head.query
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.head
            .query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name)
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// Path parameters bound by the matched route, in pattern order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The single byte range requested, if the `Range` header carries the one
    /// supported form.
    pub fn byte_range(&self) -> Option<(u64, u64)> {
        range::parse_range(self.header(header::RANGE)?)
    }

    /// Keep-alive negotiation: an explicit `Connection` token wins, the
    /// version default otherwise.
    pub fn keep_alive(&self) -> bool {
        match self.header(header::CONNECTION) {
            Some(value) => {
                let mut keep = self.head.version.default_keep_alive();
                for token in value.split(',') {
                    let token = token.trim();
                    if token.eq_ignore_ascii_case("close") {
                        keep = false;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        keep = true;
                    }
                }
                keep
            }
            None => self.head.version.default_keep_alive(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display trait implementation for [Method].
impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Display trait implementation for [Version].
impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Percent-decodes per RFC 3986, operating on bytes. Sequences that are not
/// valid `%XX` escapes pass through untouched.
pub fn percent_decode(input: &str) -> String {
    let raw = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            let hi = hex_digit(raw[i + 1]);
            let lo = hex_digit(raw[i + 2]);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Like [percent_decode], but also maps `+` to space (query components).
pub fn percent_decode_query(input: &str) -> String {
    percent_decode(&input.replace('+', " "))
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
