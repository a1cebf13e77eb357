// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Multipart body splitting. The router-facing flow is: peek at the body via
//! the replay buffer to find the boundary, rewind, then hand the handler a
//! body it can still read from the start.

use super::{decoder, headers::HeaderMap};
use crate::fail::Fail;

use bytes::Bytes;

//==============================================================================
// Constants & Structures
//==============================================================================

/// One part of a multipart body.
#[derive(Debug)]
pub struct Part {
    pub headers: HeaderMap,
    pub data: Bytes,
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Extracts the boundary parameter from a `multipart/*` Content-Type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut pieces = content_type.split(';');
    let media_type = pieces.next()?.trim();
    if !media_type.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    for piece in pieces {
        let piece = piece.trim();
        if piece.len() > 9 && piece[..9].eq_ignore_ascii_case("boundary=") {
            let value = piece[9..].trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Splits a fully read multipart body into its parts. Each part carries its
/// own header block and payload; the closing `--boundary--` marker ends the
/// walk.
pub fn parse_parts(body: &Bytes, boundary: &str) -> Result<Vec<Part>, Fail> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let data = &body[..];
    let mut parts = Vec::new();

    let mut pos = find(data, &delimiter)
        .ok_or(Fail::Malformed { details: "multipart boundary not found" })?
        + delimiter.len();

    loop {
        if data[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        pos += match &data[pos..] {
            rest if rest.starts_with(b"\r\n") => 2,
            rest if rest.starts_with(b"\n") => 1,
            _ => return Err(Fail::Malformed { details: "multipart delimiter" }),
        };

        let next = find(&data[pos..], &delimiter)
            .ok_or(Fail::Malformed { details: "unterminated multipart body" })?
            + pos;
        let mut end = next;
        // The delimiter owns the line break that precedes it.
        if end >= 2 && &data[end - 2..end] == b"\r\n" {
            end -= 2;
        } else if end >= 1 && data[end - 1] == b'\n' {
            end -= 1;
        }

        parts.push(parse_part(&body.slice(pos..end))?);
        pos = next + delimiter.len();
    }
}

fn parse_part(raw: &Bytes) -> Result<Part, Fail> {
    let (head_end, body_start) = match find(&raw[..], b"\r\n\r\n") {
        Some(pos) => (pos, pos + 4),
        None => match find(&raw[..], b"\n\n") {
            Some(pos) => (pos, pos + 2),
            None => return Err(Fail::Malformed { details: "multipart part headers" }),
        },
    };

    let mut headers = HeaderMap::new();
    let head = String::from_utf8_lossy(&raw[..head_end]);
    for line in head.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        decoder::append_header_line(&mut headers, line)?;
    }
    Ok(Part { headers, data: raw.slice(body_start..) })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests boundary extraction.
    #[test]
    fn multipart_boundary_forms() {
        assert_eq!(
            boundary("multipart/form-data; boundary=xYz"),
            Some("xYz".to_string())
        );
        assert_eq!(
            boundary("multipart/mixed; charset=utf-8; boundary=\"a b\""),
            Some("a b".to_string())
        );
        assert_eq!(boundary("text/plain; boundary=xyz"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    /// Tests splitting a two-part form body.
    #[test]
    fn multipart_two_parts() {
        let body = Bytes::from_static(
            b"--B\r\n\
              Content-Disposition: form-data; name=\"a\"\r\n\
              \r\n\
              first\r\n\
              --B\r\n\
              Content-Disposition: form-data; name=\"b\"\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              second value\r\n\
              --B--\r\n",
        );
        let parts = parse_parts(&body, "B").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].headers.get("Content-Disposition"),
            Some("form-data; name=\"a\"")
        );
        assert_eq!(&parts[0].data[..], b"first");
        assert_eq!(parts[1].headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(&parts[1].data[..], b"second value");
    }

    /// Tests malformed inputs.
    #[test]
    fn multipart_malformed() {
        assert!(parse_parts(&Bytes::from_static(b"no delimiters here"), "B").is_err());
        assert!(parse_parts(&Bytes::from_static(b"--B\r\nunterminated"), "B").is_err());
    }
}
