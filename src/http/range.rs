// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{headers::header, request::Request, response::Response};

use bytes::Bytes;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Extracts a single `bytes=<start>-<end>` range with `start <= end`. Every
/// other form (open ends, suffixes, multiple ranges, other units) is ignored,
/// so callers fall back to serving the whole resource.
pub fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let dash = spec.find('-')?;
    let start: u64 = spec[..dash].trim().parse().ok()?;
    let end: u64 = spec[dash + 1..].trim().parse().ok()?;
    if start > end {
        return None;
    }
    Some((start, end))
}

/// Formats a `Content-Range` value for a satisfied range.
pub fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", start, end, total)
}

/// Serves `body` honoring the request's byte range: 206 with the requested
/// slice, 416 when the range starts past the end, 200 for everything else.
pub fn apply_range(request: &Request, body: Bytes) -> Response {
    let total = body.len() as u64;
    match request.byte_range() {
        Some((start, _)) if start >= total => {
            let mut response = Response::new(416);
            response
                .headers_mut()
                .set(header::CONTENT_RANGE, format!("bytes */{}", total));
            response
        }
        Some((start, end)) => {
            let end = end.min(total.saturating_sub(1));
            let slice = body.slice(start as usize..(end + 1) as usize);
            let mut response = Response::with_body(206, slice);
            response
                .headers_mut()
                .set(header::CONTENT_RANGE, content_range(start, end, total));
            response
        }
        None => Response::with_body(200, body),
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::body::Body;
    use crate::http::decoder::{HeadDecoder, DEFAULT_BUFFER_SIZE};

    fn request(range: Option<&str>) -> Request {
        let mut wire = String::from("GET /file HTTP/1.1\r\n");
        if let Some(range) = range {
            wire.push_str(&format!("Range: {}\r\n", range));
        }
        wire.push_str("\r\n");
        let mut buf = bytes::BytesMut::from(wire.as_bytes());
        let head = HeadDecoder::new(DEFAULT_BUFFER_SIZE).decode(&mut buf).unwrap().unwrap();
        Request::new(head, Body::empty())
    }

    /// Tests the accepted and ignored range forms.
    #[test]
    fn range_parse_forms() {
        assert_eq!(parse_range("bytes=10-19"), Some((10, 19)));
        assert_eq!(parse_range(" bytes=0-0"), Some((0, 0)));
        assert_eq!(parse_range("bytes=19-10"), None);
        assert_eq!(parse_range("bytes=-5"), None);
        assert_eq!(parse_range("bytes=5-"), None);
        assert_eq!(parse_range("items=1-2"), None);
    }

    /// Tests a satisfied range over a 100-byte resource.
    #[test]
    fn range_satisfied() {
        let body = Bytes::from(vec![7u8; 100]);
        let response = apply_range(&request(Some("bytes=10-19")), body);
        assert_eq!(response.status(), 206);
        assert_eq!(response.headers().get("Content-Range"), Some("bytes 10-19/100"));
        match response.body() {
            crate::http::response::ResponseBody::Buffered(b) => assert_eq!(b.len(), 10),
            _ => panic!("expected buffered body"),
        }
    }

    /// Tests the unsatisfiable and absent cases.
    #[test]
    fn range_unsatisfiable_and_absent() {
        let body = Bytes::from(vec![7u8; 100]);
        let response = apply_range(&request(Some("bytes=200-300")), body.clone());
        assert_eq!(response.status(), 416);
        assert_eq!(response.headers().get("Content-Range"), Some("bytes */100"));

        let response = apply_range(&request(None), body.clone());
        assert_eq!(response.status(), 200);

        // An ignored form also falls back to 200.
        let response = apply_range(&request(Some("bytes=5-")), body);
        assert_eq!(response.status(), 200);
    }

    /// Tests that an over-long end clamps to the resource.
    #[test]
    fn range_end_clamps() {
        let body = Bytes::from(vec![7u8; 10]);
        let response = apply_range(&request(Some("bytes=5-50")), body);
        assert_eq!(response.status(), 206);
        assert_eq!(response.headers().get("Content-Range"), Some("bytes 5-9/10"));
    }
}
