// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::headers::{header, HeaderMap};
use crate::{fail::Fail, socket::AsyncSocket};

use bytes::Bytes;
use futures::{future::LocalBoxFuture, stream::LocalBoxStream};

use std::future::Future;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Callback that takes ownership of the connection socket after a 101
/// response, lifting it out of HTTP framing.
pub type UpgradeHandler = Box<dyn FnOnce(AsyncSocket) -> LocalBoxFuture<'static, Result<(), Fail>>>;

/// The three body shapes a response may carry.
pub enum ResponseBody {
    Empty,
    Buffered(Bytes),
    /// A lazily produced body. With a known `length` it is emitted under
    /// `Content-Length`; without one it is framed chunked.
    Stream {
        length: Option<u64>,
        stream: LocalBoxStream<'static, Result<Bytes, Fail>>,
    },
}

/// An outbound response.
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: HeaderMap,
    body: ResponseBody,
    upgrade: Option<UpgradeHandler>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Response].
impl Response {
    /// Creates an empty-bodied response.
    pub fn new(status: u16) -> Self {
        Self { status, reason: None, headers: HeaderMap::new(), body: ResponseBody::Empty, upgrade: None }
    }

    /// Creates a response with a fully buffered body.
    pub fn with_body<B: Into<Bytes>>(status: u16, body: B) -> Self {
        let mut response = Self::new(status);
        response.body = ResponseBody::Buffered(body.into());
        response
    }

    /// Creates a response with a streamed body. `length`, when known, is
    /// emitted as `Content-Length`; otherwise the body goes out chunked.
    pub fn with_stream(
        status: u16,
        length: Option<u64>,
        stream: LocalBoxStream<'static, Result<Bytes, Fail>>,
    ) -> Self {
        let mut response = Self::new(status);
        response.body = ResponseBody::Stream { length, stream };
        response
    }

    /// Overrides the reason phrase.
    pub fn reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Adds a header, rejecting claims the body contradicts.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, Fail> {
        self.set_header(name, value)?;
        Ok(self)
    }

    /// Sets a header. A `Content-Length` that disagrees with the actual body
    /// length is rejected here, before anything reaches the wire.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Fail> {
        if name.eq_ignore_ascii_case(header::TRANSFER_ENCODING) {
            return Err(Fail::Invalid { details: "transfer encoding is chosen by the body" });
        }
        if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
            let declared: u64 = value
                .trim()
                .parse()
                .map_err(|_| Fail::Invalid { details: "content length" })?;
            match &mut self.body {
                ResponseBody::Empty if declared != 0 => {
                    return Err(Fail::Invalid { details: "content length does not match body" });
                }
                ResponseBody::Buffered(bytes) if declared != bytes.len() as u64 => {
                    return Err(Fail::Invalid { details: "content length does not match body" });
                }
                ResponseBody::Stream { length, .. } => match *length {
                    Some(known) if known != declared => {
                        return Err(Fail::Invalid { details: "content length does not match body" });
                    }
                    // The handler is declaring the stream's length.
                    _ => *length = Some(declared),
                },
                _ => (),
            }
        }
        self.headers.set(name, value);
        Ok(())
    }

    /// Attaches a protocol-upgrade callback; the driver hands it the socket
    /// after writing a 101 head.
    pub fn with_upgrade<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(AsyncSocket) -> Fut + 'static,
        Fut: Future<Output = Result<(), Fail>> + 'static,
    {
        self.upgrade = Some(Box::new(move |socket| Box::pin(callback(socket))));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason_phrase(&self) -> &str {
        match &self.reason {
            Some(reason) => reason,
            None => default_reason(self.status),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub(crate) fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub(crate) fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Empty)
    }

    pub fn has_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<UpgradeHandler> {
        self.upgrade.take()
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Canonical reason phrase for a status code.
pub fn default_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        416 => "Range Not Satisfiable",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that a lying Content-Length is rejected at construction.
    #[test]
    fn response_rejects_length_mismatch() {
        let result = Response::with_body(200, &b"hello"[..]).header("Content-Length", "4");
        assert!(result.is_err());
        let result = Response::with_body(200, &b"hello"[..]).header("Content-Length", "5");
        assert!(result.is_ok());
        let result = Response::new(204).header("content-length", "3");
        assert!(result.is_err());
    }

    /// Tests that manual transfer encoding is refused.
    #[test]
    fn response_rejects_manual_transfer_encoding() {
        let result = Response::new(200).header("Transfer-Encoding", "chunked");
        assert!(result.is_err());
    }

    /// Tests reason phrase defaulting and override.
    #[test]
    fn response_reason() {
        assert_eq!(Response::new(404).reason_phrase(), "Not Found");
        assert_eq!(Response::new(200).reason("Fine").reason_phrase(), "Fine");
        assert_eq!(Response::new(799).reason_phrase(), "Unknown");
    }
}
