// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! # HTTP Server
//!
//! The accept loop and its supervision: one driver task per accepted
//! connection, a broadcast stop signal for graceful shutdown, and the route
//! registration surface. The server is a handle; clone it freely and drive
//! `run` from the executor.

mod config;
pub(crate) mod connection;

pub use config::ServerConfig;

use connection::{DriverConfig, StopSignal};

use crate::{
    fail::Fail,
    router::{HttpHandler, Route, Router},
    runtime::{with_timeout, Runtime},
    socket::{shim, AsyncSocket, Socket, SocketAddress},
};

use futures::{
    channel::oneshot,
    future::{FutureExt, LocalBoxFuture},
    pin_mut, select,
    stream::{FuturesUnordered, StreamExt},
};

use std::{cell::RefCell, rc::Rc, time::Duration};

//==============================================================================
// Constants & Structures
//==============================================================================

type StopRequest = (Duration, oneshot::Sender<()>);

struct ServerInner {
    config: ServerConfig,
    router: Rc<RefCell<Router>>,
    listening: Option<SocketAddress>,
    running: bool,
    stop_request: Option<oneshot::Sender<StopRequest>>,
}

/// The server handle.
#[derive(Clone)]
pub struct HttpServer {
    inner: Rc<RefCell<ServerInner>>,
    rt: Runtime,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [HttpServer].
impl HttpServer {
    pub fn new(config: ServerConfig, rt: Runtime) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ServerInner {
                config,
                router: Rc::new(RefCell::new(Router::new())),
                listening: None,
                running: false,
                stop_request: None,
            })),
            rt,
        }
    }

    /// Registers a handler under a textual route pattern. Takes effect for
    /// subsequent requests, including on already-open connections.
    pub fn route<H: HttpHandler + 'static>(&self, pattern: &str, handler: H) -> Result<(), Fail> {
        let route = Route::parse(pattern)?;
        self.append_route(route, Rc::new(handler));
        Ok(())
    }

    /// Registers a pre-built route.
    pub fn append_route(&self, route: Route, handler: Rc<dyn HttpHandler>) {
        let inner = self.inner.borrow();
        inner.router.borrow_mut().append(route, handler);
    }

    /// The concrete bound address, once `run` has bound the listener. A
    /// request for port zero resolves to the kernel-chosen port here.
    pub fn listening_address(&self) -> Option<SocketAddress> {
        self.inner.borrow().listening.clone()
    }

    /// Accepts and serves connections until [stop](HttpServer::stop) is
    /// called or the listener dies. Fails fast when already running.
    pub async fn run(&self) -> Result<(), Fail> {
        let (stop_tx, stop_rx) = oneshot::channel::<StopRequest>();
        let (config, router) = {
            let mut inner = self.inner.borrow_mut();
            if inner.running {
                return Err(Fail::AlreadyStarted {});
            }
            inner.running = true;
            inner.stop_request = Some(stop_tx);
            (inner.config.clone(), inner.router.clone())
        };

        let result = self.accept_loop(&config, router, stop_rx).await;

        let mut inner = self.inner.borrow_mut();
        inner.running = false;
        inner.stop_request = None;
        inner.listening = None;
        if let SocketAddress::Unix { path } = &config.address {
            let _ = shim::unlink(path);
        }
        result
    }

    /// Signals shutdown: the listener closes, idle connections exit at once,
    /// busy ones get `timeout` to drain their in-flight exchange, stragglers
    /// are cancelled. Resolves when `run` has wound down.
    pub async fn stop(&self, timeout: Duration) -> Result<(), Fail> {
        let sender = self.inner.borrow_mut().stop_request.take();
        let sender = sender.ok_or(Fail::Invalid { details: "server not running" })?;
        let (done_tx, done_rx) = oneshot::channel();
        sender
            .send((timeout, done_tx))
            .map_err(|_| Fail::Invalid { details: "server not running" })?;
        done_rx.await.map_err(|_| Fail::Cancelled {})
    }

    async fn accept_loop(
        &self,
        config: &ServerConfig,
        router: Rc<RefCell<Router>>,
        stop_rx: oneshot::Receiver<StopRequest>,
    ) -> Result<(), Fail> {
        let listener = Socket::stream(config.address.family())?;
        listener.set_reuseaddr()?;
        listener.bind(&config.address)?;
        listener.listen(config.backlog)?;
        let bound = listener.local_address()?;
        info!("listening on {}", bound);
        self.inner.borrow_mut().listening = Some(bound);

        let listener = AsyncSocket::new(listener, self.rt.sockets().clone())?;
        let stop = StopSignal::new();
        let driver_config = DriverConfig {
            timeout: config.timeout,
            buffer_size: config.shared_request_buffer_size,
            replay_size: config.shared_request_replay_size,
        };
        let mut connections: FuturesUnordered<LocalBoxFuture<'static, ()>> = FuturesUnordered::new();
        let mut stop_rx = stop_rx.fuse();
        let mut stop_request: Option<StopRequest> = None;
        let mut result = Ok(());

        loop {
            let accept = listener.accept().fuse();
            pin_mut!(accept);
            select! {
                accepted = accept => match accepted {
                    Ok((io, peer)) => {
                        connections.push(Box::pin(connection::drive(
                            io,
                            peer,
                            router.clone(),
                            self.rt.clone(),
                            stop.clone(),
                            driver_config,
                        )));
                    }
                    Err(e) if e.transient_accept() => {
                        warn!("accept failed transiently ({})", e);
                    }
                    Err(e) => {
                        warn!("listener failed ({})", e);
                        result = Err(e);
                        break;
                    }
                },
                _ = connections.select_next_some() => (),
                request = stop_rx => {
                    if let Ok(request) = request {
                        stop_request = Some(request);
                    }
                    break;
                }
            }
        }

        // End the accept loop before draining: no new connections during
        // shutdown.
        drop(listener);
        stop.fire();

        match stop_request {
            Some((timeout, done_tx)) => {
                let drain = async {
                    while connections.next().await.is_some() {}
                };
                match with_timeout(&self.rt, timeout, drain).await {
                    Ok(()) => debug!("all connections drained"),
                    Err(_) => warn!("shutdown deadline hit; cancelling {} connections", connections.len()),
                }
                drop(connections);
                let _ = done_tx.send(());
            }
            None => {
                drop(connections);
            }
        }
        result
    }
}
