// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! # catwalk
//!
//! An embeddable HTTP/1.1 server engine driven from a cooperative,
//! single-threaded executor. The core is four subsystems: a polling socket
//! pool that parks tasks until the kernel reports readiness (epoll, kqueue,
//! or poll(2)), an asynchronous socket layer that suspends on `EWOULDBLOCK`,
//! an incremental HTTP codec, and a route-dispatching connection driver with
//! keep-alive, timeouts, and protocol-upgrade handoff.
//!
//! ```no_run
//! use catwalk::{Executor, HttpServer, Response, ServerConfig, SocketAddress};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! fn main() -> Result<(), catwalk::Fail> {
//!     let mut executor = Executor::new()?;
//!     let address = SocketAddress::inet(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
//!     let server = HttpServer::new(ServerConfig::new(address), executor.runtime());
//!     server.route("GET /hello/:name", catwalk::handler(|req| async move {
//!         let name = req.param("name").unwrap_or("world").to_string();
//!         Ok(Response::with_body(200, bytes::Bytes::from(format!("hello, {}", name))))
//!     }))?;
//!     executor.block_on(async move { server.run().await })??;
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate log;

pub mod fail;
pub mod http;
pub mod logging;
pub mod poll;
pub mod router;
pub mod runtime;
pub mod server;
pub mod socket;

pub use crate::{
    fail::Fail,
    http::{Body, HeaderMap, Method, Request, Response, Version},
    poll::SocketPool,
    router::{handler, HttpHandler, Route, Router},
    runtime::{with_timeout, Executor, Runtime},
    server::{HttpServer, ServerConfig},
    socket::{AsyncSocket, Socket, SocketAddress},
};
