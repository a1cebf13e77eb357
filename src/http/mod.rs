// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! # HTTP/1.1 Codec
//!
//! Incremental request decoding and response encoding, restricted to the
//! HTTP/1.1 subset this engine serves. The decoders are sans-I/O state
//! machines; the connection driver owns the socket and pumps bytes through
//! them, so the same machines back both the live server and the unit tests.

pub mod body;
pub mod decoder;
pub mod encoder;
pub mod headers;
pub mod multipart;
pub mod range;
pub mod request;
pub mod response;

pub use body::Body;
pub use headers::{header, HeaderMap};
pub use request::{Method, Request, RequestHead, Version};
pub use response::{Response, ResponseBody, UpgradeHandler};
