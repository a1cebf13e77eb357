// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Response (and request) serialization. Everything here is pure: the
//! connection driver owns the socket writes so the chunked path can stream
//! one frame at a time instead of accumulating the body.

use super::{
    headers::header,
    request::RequestHead,
    response::{Response, ResponseBody},
};
use crate::fail::Fail;

use bytes::{BufMut, Bytes, BytesMut};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Tells whether a status code forbids a message body outright.
fn bodyless_status(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

/// Serializes the status line and headers, fixing up the framing headers
/// from the body shape first. Emission is CRLF-framed, headers in insertion
/// order.
pub fn encode_head(response: &mut Response) -> Result<Bytes, Fail> {
    let status = response.status();
    match response.body() {
        ResponseBody::Empty => {
            if !bodyless_status(status) && !response.headers().contains(header::CONTENT_LENGTH) {
                response.headers_mut().set(header::CONTENT_LENGTH, "0");
            }
        }
        ResponseBody::Buffered(bytes) => {
            let length = bytes.len().to_string();
            response.headers_mut().set(header::CONTENT_LENGTH, length);
        }
        ResponseBody::Stream { length: Some(length), .. } => {
            let length = length.to_string();
            response.headers_mut().set(header::CONTENT_LENGTH, length);
        }
        ResponseBody::Stream { length: None, .. } => {
            response.headers_mut().set(header::TRANSFER_ENCODING, "chunked");
        }
    }

    let mut out = BytesMut::with_capacity(128);
    out.put_slice(b"HTTP/1.1 ");
    out.put_slice(status.to_string().as_bytes());
    out.put_u8(b' ');
    out.put_slice(response.reason_phrase().as_bytes());
    out.put_slice(b"\r\n");
    for (name, value) in response.headers().iter() {
        out.put_slice(name.as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    Ok(out.freeze())
}

/// Frames one chunk of an unknown-length body.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 16);
    out.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.put_slice(data);
    out.put_slice(b"\r\n");
    out.freeze()
}

/// The zero-size chunk that terminates a chunked body.
pub fn encode_chunk_terminator() -> Bytes {
    Bytes::from_static(b"0\r\n\r\n")
}

/// Serializes a request head back to wire form. For a canonical request
/// (CRLF-framed, single spaces, no obsolete folding) this reproduces the
/// parsed bytes exactly.
pub fn encode_request_head(head: &RequestHead) -> Bytes {
    let mut out = BytesMut::with_capacity(128);
    out.put_slice(head.method.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(head.target.as_bytes());
    out.put_u8(b' ');
    out.put_slice(format!("{}", head.version).as_bytes());
    out.put_slice(b"\r\n");
    for (name, value) in head.headers.iter() {
        out.put_slice(name.as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    out.freeze()
}

//==============================================================================
// Unit Tests
//==============================================================================
