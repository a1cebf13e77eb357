// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Incremental HTTP/1.1 request parsing, kept free of I/O: the connection
//! driver appends wire bytes to a shared buffer and the decoders here consume
//! exactly what they understand, so pipelined bytes stay in the buffer for
//! the next request. CRLF is the canonical line ending; a bare LF is
//! tolerated on input.

use super::{
    headers::{header, HeaderMap},
    request::{percent_decode, percent_decode_query, Method, RequestHead, Version},
};
use crate::fail::Fail;

use bytes::{Bytes, BytesMut};

use std::mem;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Default ceiling of the shared per-connection parse buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Hard cap on the total header bytes of one request.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

enum DecodeState {
    RequestLine,
    Headers { head: RequestHead },
    Done,
}

/// Request-head state machine: AwaitingRequestLine → AwaitingHeaders → Done.
pub struct HeadDecoder {
    buffer_size: usize,
    header_bytes: usize,
    state: DecodeState,
}

/// How the bytes after the head are framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Fixed(u64),
    Chunked,
}

enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataDelimiter,
    Trailers,
    Done,
}

/// Progress of the chunk decoder over one consume attempt.
#[derive(Debug, PartialEq)]
pub enum ChunkProgress {
    /// A slice of chunk payload, in wire order.
    Data(Bytes),
    /// The buffer holds no complete element; feed more bytes.
    NeedMore,
    /// The zero-size chunk and its trailers have been consumed.
    Complete,
}

/// Chunked transfer decoder: hex size line, payload, CRLF, repeated until a
/// zero-size chunk; trailers are read and discarded.
pub struct ChunkDecoder {
    state: ChunkState,
    trailer_bytes: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [HeadDecoder].
impl HeadDecoder {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size, header_bytes: 0, state: DecodeState::RequestLine }
    }

    /// Tells whether no request line has been seen yet. EOF in this state is
    /// a clean close rather than a truncated request.
    pub fn is_idle(&self) -> bool {
        match self.state {
            DecodeState::RequestLine => true,
            _ => false,
        }
    }

    /// Consumes complete lines from `buf`. `Ok(None)` means the buffer holds
    /// no complete element yet and more wire bytes are needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestHead>, Fail> {
        loop {
            let line = match take_line(buf, self.buffer_size, "request head")? {
                Some(line) => line,
                None => return Ok(None),
            };
            self.header_bytes += line.len() + 2;
            if self.header_bytes > MAX_HEADER_BYTES {
                return Err(Fail::TooLarge { details: "header block" });
            }
            match mem::replace(&mut self.state, DecodeState::Done) {
                DecodeState::RequestLine => {
                    if line.is_empty() {
                        // Robustness: blank lines before the request line are
                        // skipped (RFC 7230 §3.5).
                        self.state = DecodeState::RequestLine;
                        continue;
                    }
                    let head = parse_request_line(&line)?;
                    self.state = DecodeState::Headers { head };
                }
                DecodeState::Headers { mut head } => {
                    if line.is_empty() {
                        self.state = DecodeState::Done;
                        return Ok(Some(head));
                    }
                    append_header_line(&mut head.headers, &line)?;
                    self.state = DecodeState::Headers { head };
                }
                DecodeState::Done => {
                    return Err(Fail::Invalid { details: "decoder already finished" });
                }
            }
        }
    }
}

/// Associate functions for [ChunkDecoder].
impl ChunkDecoder {
    pub fn new() -> Self {
        Self { state: ChunkState::Size, trailer_bytes: 0 }
    }

    /// Consumes the next complete element from `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<ChunkProgress, Fail> {
        loop {
            match &mut self.state {
                ChunkState::Size => {
                    let line = match take_line(buf, MAX_HEADER_BYTES, "chunk size line")? {
                        Some(line) => line,
                        None => return Ok(ChunkProgress::NeedMore),
                    };
                    // Chunk extensions after ';' are tolerated and ignored.
                    let digits = match line.find(';') {
                        Some(pos) => &line[..pos],
                        None => &line[..],
                    };
                    let size = parse_chunk_size(digits.trim())?;
                    if size == 0 {
                        self.state = ChunkState::Trailers;
                    } else {
                        self.state = ChunkState::Data { remaining: size };
                    }
                }
                ChunkState::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(ChunkProgress::NeedMore);
                    }
                    let take = (*remaining).min(buf.len() as u64) as usize;
                    let data = buf.split_to(take).freeze();
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        self.state = ChunkState::DataDelimiter;
                    }
                    return Ok(ChunkProgress::Data(data));
                }
                ChunkState::DataDelimiter => {
                    match take_line(buf, MAX_HEADER_BYTES, "chunk delimiter")? {
                        Some(line) if line.is_empty() => self.state = ChunkState::Size,
                        Some(_) => {
                            return Err(Fail::Malformed { details: "chunk delimiter" });
                        }
                        None => return Ok(ChunkProgress::NeedMore),
                    }
                }
                ChunkState::Trailers => {
                    let line = match take_line(buf, MAX_HEADER_BYTES, "trailer line")? {
                        Some(line) => line,
                        None => return Ok(ChunkProgress::NeedMore),
                    };
                    self.trailer_bytes += line.len() + 2;
                    if self.trailer_bytes > MAX_HEADER_BYTES {
                        return Err(Fail::TooLarge { details: "trailer block" });
                    }
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                        return Ok(ChunkProgress::Complete);
                    }
                }
                ChunkState::Done => return Ok(ChunkProgress::Complete),
            }
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Splits one line off `buf`, tolerating a bare LF terminator. `Ok(None)`
/// when no full line is buffered; [Fail::TooLarge] when the buffer already
/// exceeds `cap` without holding one.
pub(crate) fn take_line(
    buf: &mut BytesMut,
    cap: usize,
    what: &'static str,
) -> Result<Option<String>, Fail> {
    match buf.iter().position(|b| *b == b'\n') {
        Some(pos) => {
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                let end = line.len() - 1;
                line.truncate(end);
            }
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        }
        None => {
            if buf.len() >= cap {
                return Err(Fail::TooLarge { details: what });
            }
            Ok(None)
        }
    }
}

fn parse_request_line(line: &str) -> Result<RequestHead, Fail> {
    let mut parts = line.split(' ');
    let method = parts.next().filter(|t| !t.is_empty());
    let target = parts.next().filter(|t| !t.is_empty());
    let version = parts.next().filter(|t| !t.is_empty());
    let (method, target, version) = match (method, target, version, parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return Err(Fail::Malformed { details: "request line" }),
    };

    let version = parse_version(version)?;
    let (path, raw_query) = match target.find('?') {
        Some(pos) => (&target[..pos], &target[pos + 1..]),
        None => (target, ""),
    };
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .collect();
    let query = parse_query(raw_query);

    Ok(RequestHead {
        method: Method::parse(method),
        target: target.to_string(),
        path: path.to_string(),
        segments,
        query,
        version,
        headers: HeaderMap::new(),
    })
}

fn parse_version(token: &str) -> Result<Version, Fail> {
    let bytes = token.as_bytes();
    if bytes.len() != 8
        || &bytes[..5] != b"HTTP/"
        || !bytes[5].is_ascii_digit()
        || bytes[6] != b'.'
        || !bytes[7].is_ascii_digit()
    {
        return Err(Fail::Malformed { details: "protocol version" });
    }
    Ok(Version { major: bytes[5] - b'0', minor: bytes[7] - b'0' })
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.find('=') {
            Some(pos) => (
                percent_decode_query(&pair[..pos]),
                percent_decode_query(&pair[pos + 1..]),
            ),
            None => (percent_decode_query(pair), String::new()),
        })
        .collect()
}

pub(crate) fn append_header_line(headers: &mut HeaderMap, line: &str) -> Result<(), Fail> {
    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(Fail::Malformed { details: "obsolete line folding" });
    }
    let colon = match line.find(':') {
        Some(pos) if pos > 0 => pos,
        _ => return Err(Fail::Malformed { details: "header line" }),
    };
    let name = &line[..colon];
    if name.chars().any(|c| c.is_ascii_whitespace()) {
        return Err(Fail::Malformed { details: "header name" });
    }
    let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');
    headers.append_wire(name, value);
    Ok(())
}

/// Determines body framing, strictly in this order: chunked transfer coding,
/// then Content-Length, then no body. Conflicts are parse errors.
pub fn body_framing(headers: &HeaderMap) -> Result<BodyFraming, Fail> {
    let transfer_encoding = headers.get(header::TRANSFER_ENCODING);
    let content_length = headers.get(header::CONTENT_LENGTH);

    if let Some(value) = transfer_encoding {
        let chunked = value.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked"));
        if !chunked {
            return Err(Fail::Malformed { details: "unsupported transfer encoding" });
        }
        if content_length.is_some() {
            return Err(Fail::Malformed { details: "conflicting body framing" });
        }
        return Ok(BodyFraming::Chunked);
    }

    match content_length {
        Some(value) => {
            // Repeated Content-Length headers arrive joined; every token must
            // agree on one value.
            let mut agreed: Option<u64> = None;
            for token in value.split(',') {
                let n = token
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Fail::Malformed { details: "content length" })?;
                match agreed {
                    Some(prev) if prev != n => {
                        return Err(Fail::Malformed { details: "conflicting content lengths" });
                    }
                    _ => agreed = Some(n),
                }
            }
            match agreed {
                Some(n) => Ok(BodyFraming::Fixed(n)),
                None => Err(Fail::Malformed { details: "content length" }),
            }
        }
        None => Ok(BodyFraming::None),
    }
}

fn parse_chunk_size(digits: &str) -> Result<u64, Fail> {
    if digits.is_empty() {
        return Err(Fail::Malformed { details: "chunk size" });
    }
    let mut size: u64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(16).ok_or(Fail::Malformed { details: "chunk size" })?;
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as u64))
            .ok_or(Fail::Malformed { details: "chunk size overflow" })?;
    }
    Ok(size)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_head(wire: &[u8]) -> Result<Option<RequestHead>, Fail> {
        let mut buf = BytesMut::from(wire);
        HeadDecoder::new(DEFAULT_BUFFER_SIZE).decode(&mut buf)
    }

    /// Tests a plain GET head.
    #[test]
    fn decoder_simple_get() {
        let head = decode_head(b"GET /a/b?x=1&y=2 HTTP/1.1\r\nHost: h\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.path, "/a/b");
        assert_eq!(head.segments, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            head.query,
            vec![("x".to_string(), "1".to_string()), ("y".to_string(), "2".to_string())]
        );
        assert_eq!(head.version, Version::HTTP11);
        assert_eq!(head.headers.get("host"), Some("h"));
    }

    /// Tests incremental feeding: no head until the blank line arrives.
    #[test]
    fn decoder_incremental() {
        let mut decoder = HeadDecoder::new(DEFAULT_BUFFER_SIZE);
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHo"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"st: h\r\n\r\nleftover");
        let head = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.headers.get("Host"), Some("h"));
        // Pipelined bytes stay in the buffer.
        assert_eq!(&buf[..], b"leftover");
    }

    /// Tests percent decoding of path segments, byte-wise.
    #[test]
    fn decoder_percent_decoded_segments() {
        let head = decode_head(b"GET /a%20b/c%2Fd HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.segments, vec!["a b".to_string(), "c/d".to_string()]);
        // The raw path is preserved for re-serialization.
        assert_eq!(head.path, "/a%20b/c%2Fd");
    }

    /// Tests bare-LF tolerance.
    #[test]
    fn decoder_bare_lf() {
        let head = decode_head(b"GET / HTTP/1.1\nHost: h\n\n").unwrap().unwrap();
        assert_eq!(head.headers.get("Host"), Some("h"));
    }

    /// Tests malformed request lines and versions.
    #[test]
    fn decoder_malformed_request_line() {
        assert!(decode_head(b"GET /\r\n\r\n").unwrap_err().to_string().contains("request line"));
        assert!(decode_head(b"GET / HTTP/1.1 extra\r\n\r\n").is_err());
        assert!(decode_head(b"GET / HTP/1.1\r\n\r\n").is_err());
        assert!(decode_head(b"GET / HTTP/11.1\r\n\r\n").is_err());
    }

    /// Tests rejection of obsolete line folding.
    #[test]
    fn decoder_rejects_folding() {
        let result = decode_head(b"GET / HTTP/1.1\r\nA: b\r\n c\r\n\r\n");
        assert_eq!(result.unwrap_err(), Fail::Malformed { details: "obsolete line folding" });
    }

    /// Tests value whitespace trimming and duplicate joining.
    #[test]
    fn decoder_header_values() {
        let head = decode_head(b"GET / HTTP/1.1\r\nA:  x \r\na: y\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.headers.get("A"), Some("x, y"));
    }

    /// Tests the header-block cap.
    #[test]
    fn decoder_header_cap() {
        let mut decoder = HeadDecoder::new(DEFAULT_BUFFER_SIZE);
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        decoder.decode(&mut buf).unwrap();
        let mut result = Ok(None);
        for i in 0..20 {
            let line = format!("X-{}: {}\r\n", i, "v".repeat(1000));
            buf.extend_from_slice(line.as_bytes());
            result = decoder.decode(&mut buf);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err(), Fail::TooLarge { details: "header block" });
    }

    /// Tests the parse-buffer ceiling for one oversized element.
    #[test]
    fn decoder_buffer_cap() {
        let mut decoder = HeadDecoder::new(64);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'a'; 80]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            Fail::TooLarge { details: "request head" }
        );
    }

    /// Tests framing selection and conflicts.
    #[test]
    fn decoder_body_framing() {
        let mut headers = HeaderMap::new();
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::None);

        headers.set("Content-Length", "10");
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Fixed(10));

        headers.append_wire("Content-Length", "10");
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Fixed(10));

        headers.set("Content-Length", "10, 12");
        assert!(body_framing(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.set("Transfer-Encoding", "chunked");
        assert_eq!(body_framing(&headers).unwrap(), BodyFraming::Chunked);

        headers.set("Content-Length", "10");
        assert!(body_framing(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.set("Transfer-Encoding", "gzip");
        assert!(body_framing(&headers).is_err());
    }

    /// Tests chunk decoding across feed boundaries.
    #[test]
    fn decoder_chunked_split_feeds() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&b"5\r\nhel"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), ChunkProgress::Data(Bytes::from_static(b"hel")));
        assert_eq!(decoder.decode(&mut buf).unwrap(), ChunkProgress::NeedMore);
        buf.extend_from_slice(b"lo\r\n6\r\n world\r\n0\r\n\r\n");
        assert_eq!(decoder.decode(&mut buf).unwrap(), ChunkProgress::Data(Bytes::from_static(b"lo")));
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            ChunkProgress::Data(Bytes::from_static(b" world"))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), ChunkProgress::Complete);
        assert!(buf.is_empty());
    }

    /// Tests chunk extension tolerance and trailer discarding.
    #[test]
    fn decoder_chunked_extensions_and_trailers() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&b"4;name=v\r\nabcd\r\n0\r\nX-Trailer: t\r\n\r\nrest"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), ChunkProgress::Data(Bytes::from_static(b"abcd")));
        assert_eq!(decoder.decode(&mut buf).unwrap(), ChunkProgress::Complete);
        assert_eq!(&buf[..], b"rest");
    }

    /// Tests malformed chunk sizes.
    #[test]
    fn decoder_chunked_malformed() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(decoder.decode(&mut buf).is_err());

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            Fail::Malformed { details: "chunk size overflow" }
        );

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&b"2\r\nabXX\r\n"[..]);
        decoder.decode(&mut buf).unwrap();
        assert_eq!(
            decoder.decode(&mut buf).unwrap_err(),
            Fail::Malformed { details: "chunk delimiter" }
        );
    }
}
