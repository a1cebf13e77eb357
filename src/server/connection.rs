// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The per-connection driver: read one request, dispatch, write one
//! response, repeat while keep-alive holds. Requests on a connection are
//! served strictly in arrival order; the socket is closed exactly once on
//! every exit path except a protocol upgrade, which walks off with it.

use crate::{
    fail::Fail,
    http::{
        body::Body,
        decoder::{self, HeadDecoder},
        encoder,
        headers::header,
        request::{Request, RequestHead},
        response::{Response, ResponseBody},
    },
    router::Router,
    runtime::{with_timeout, Runtime},
    socket::{AsyncSocket, SocketAddress},
};

use bytes::BytesMut;
use futures::{
    future::{select, Either},
    pin_mut,
    stream::StreamExt,
};

use std::{
    cell::{Cell, RefCell},
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
    time::Duration,
};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Broadcast stop flag shared by the accept loop and every live connection.
/// Idle connections exit as soon as it fires; busy ones finish the in-flight
/// exchange and then close.
pub(crate) struct StopSignal {
    fired: Cell<bool>,
    wakers: RefCell<Vec<Waker>>,
}

/// Future side of [StopSignal].
pub(crate) struct StopWait {
    signal: Rc<StopSignal>,
}

/// The slice of server configuration a connection needs.
#[derive(Clone, Copy)]
pub(crate) struct DriverConfig {
    pub timeout: Duration,
    pub buffer_size: usize,
    pub replay_size: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [StopSignal].
impl StopSignal {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { fired: Cell::new(false), wakers: RefCell::new(Vec::new()) })
    }

    pub fn fired(&self) -> bool {
        self.fired.get()
    }

    pub fn fire(&self) {
        if self.fired.replace(true) {
            return;
        }
        let wakers = self.wakers.borrow_mut().split_off(0);
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn wait(self: &Rc<Self>) -> StopWait {
        StopWait { signal: self.clone() }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Future trait implementation for [StopWait].
impl Future for StopWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<()> {
        if self.signal.fired() {
            return Poll::Ready(());
        }
        let mut wakers = self.signal.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(ctx.waker())) {
            wakers.push(ctx.waker().clone());
        }
        Poll::Pending
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Drives one accepted connection to completion.
pub(crate) async fn drive(
    io: AsyncSocket,
    peer: SocketAddress,
    router: Rc<RefCell<Router>>,
    rt: Runtime,
    stop: Rc<StopSignal>,
    config: DriverConfig,
) {
    debug!("open connection: {}", peer);
    let io = Rc::new(io);
    let wire = Rc::new(RefCell::new(BytesMut::new()));

    loop {
        // Idle wait: leftover pipelined bytes count as readiness. The wait is
        // unbounded (keep-alive connections may idle) but races the stop
        // signal so a graceful shutdown reaches parked connections promptly.
        if wire.borrow().is_empty() {
            let stop_wait = stop.wait();
            let readable = io.readable();
            pin_mut!(stop_wait);
            pin_mut!(readable);
            match select(stop_wait, readable).await {
                Either::Left(((), _)) => break,
                Either::Right((Ok(()), _)) => (),
                Either::Right((Err(_), _)) => break,
            }
        } else if stop.fired() {
            break;
        }

        // Bytes have started arriving: the head must complete in time.
        let head = match with_timeout(&rt, config.timeout, read_head(&io, &wire, config.buffer_size))
            .await
        {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                respond_and_log(&io, &peer, &e).await;
                break;
            }
            Err(Fail::Timeout {}) => {
                warn!("request head timed out: {}", peer);
                let _ = write_response(&io, closing(Response::new(408))).await;
                break;
            }
            Err(_) => break,
        };

        info!("{}: {} {}", peer, head.method, head.target);
        let framing = match decoder::body_framing(&head.headers) {
            Ok(framing) => framing,
            Err(e) => {
                respond_and_log(&io, &peer, &e).await;
                break;
            }
        };

        let body = Body::wire(io.clone(), wire.clone(), framing, config.buffer_size, config.replay_size);
        let drain_handle = body.clone();
        let connection_header = head.headers.get(header::CONNECTION).map(str::to_string);
        let mut request = Request::new(head, body);
        let mut keep_alive = request.keep_alive() && !stop.fired();

        // Dispatch. The router borrow is released before the handler runs so
        // registrations stay possible while handlers are in flight.
        let looked_up = { router.borrow().lookup(&request) };
        let mut response = match looked_up {
            Ok((handler, params)) => {
                request.set_params(params);
                match with_timeout(&rt, config.timeout, handler.handle_request(request)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!("handler failed: {} ({})", peer, e);
                        Response::new(500)
                    }
                    Err(Fail::Timeout {}) => {
                        warn!("handler timed out: {}", peer);
                        keep_alive = false;
                        Response::new(500)
                    }
                    Err(e) => {
                        warn!("handler failed: {} ({})", peer, e);
                        keep_alive = false;
                        Response::new(500)
                    }
                }
            }
            Err(Fail::Unhandled {}) => Response::new(404),
            Err(e) => {
                warn!("dispatch failed: {} ({})", peer, e);
                Response::new(500)
            }
        };

        // Whatever the handler left unread must leave the wire before the
        // response does, or the next request would parse garbage.
        if !drain_handle.is_exhausted() {
            match with_timeout(&rt, config.timeout, drain_handle.drain()).await {
                Ok(Ok(())) => (),
                _ => keep_alive = false,
            }
        }

        let upgrade = if response.status() == 101 { response.take_upgrade() } else { None };
        if upgrade.is_none() {
            if keep_alive && !stop.fired() {
                if let Some(value) = connection_header {
                    if !response.headers().contains(header::CONNECTION) {
                        response.headers_mut().set(header::CONNECTION, value);
                    }
                }
            } else {
                keep_alive = false;
                response = closing(response);
            }
        }

        if let Err(e) = write_response(&io, response).await {
            warn!("write failed: {} ({})", peer, e);
            break;
        }

        if let Some(callback) = upgrade {
            drop(drain_handle);
            match Rc::try_unwrap(io) {
                Ok(socket) => {
                    debug!("upgraded connection: {}", peer);
                    if let Err(e) = callback(socket).await {
                        warn!("upgrade handler failed: {} ({})", peer, e);
                    }
                }
                Err(_) => warn!("upgrade refused: connection still shared: {}", peer),
            }
            return;
        }

        if !keep_alive || stop.fired() {
            break;
        }
    }
    debug!("close connection: {}", peer);
}

/// Reads wire bytes until one full request head parses. `Ok(None)` is a
/// clean close between requests.
async fn read_head(
    io: &Rc<AsyncSocket>,
    wire: &Rc<RefCell<BytesMut>>,
    buffer_size: usize,
) -> Result<Option<RequestHead>, Fail> {
    let mut decoder = HeadDecoder::new(buffer_size);
    loop {
        let parsed = {
            let mut buf = wire.borrow_mut();
            decoder.decode(&mut buf)?
        };
        if let Some(head) = parsed {
            return Ok(Some(head));
        }
        let mut chunk = BytesMut::with_capacity(buffer_size);
        chunk.resize(buffer_size, 0);
        let n = io.read(&mut chunk[..]).await?;
        if n == 0 {
            if decoder.is_idle() && wire.borrow().is_empty() {
                return Ok(None);
            }
            return Err(Fail::Disconnected {});
        }
        wire.borrow_mut().extend_from_slice(&chunk[..n]);
    }
}

/// Maps a parse failure onto its status code and reports it, then forces the
/// connection closed by the caller.
async fn respond_and_log(io: &Rc<AsyncSocket>, peer: &SocketAddress, failure: &Fail) {
    let status = match failure {
        Fail::TooLarge { .. } => 413,
        Fail::Malformed { .. } => 400,
        Fail::Disconnected {} => {
            debug!("peer vanished mid-request: {}", peer);
            return;
        }
        _ => 400,
    };
    warn!("bad request from {}: {} -> {}", peer, failure, status);
    let _ = write_response(io, closing(Response::new(status))).await;
}

fn closing(mut response: Response) -> Response {
    response.headers_mut().set(header::CONNECTION, "close");
    response
}

/// Serializes one response onto the socket. Streaming bodies go out one
/// frame at a time; a known-length stream that lies about its length is a
/// hard error after the fact.
pub(crate) async fn write_response(io: &AsyncSocket, mut response: Response) -> Result<(), Fail> {
    let head = encoder::encode_head(&mut response)?;
    io.write_all(&head).await?;
    match response.take_body() {
        ResponseBody::Empty => Ok(()),
        ResponseBody::Buffered(bytes) => io.write_all(&bytes).await,
        ResponseBody::Stream { length: Some(declared), mut stream } => {
            let mut sent: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                sent += chunk.len() as u64;
                if sent > declared {
                    return Err(Fail::Invalid { details: "stream exceeded declared length" });
                }
                io.write_all(&chunk).await?;
            }
            if sent != declared {
                return Err(Fail::Invalid { details: "stream shorter than declared length" });
            }
            Ok(())
        }
        ResponseBody::Stream { length: None, mut stream } => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if chunk.is_empty() {
                    // An empty frame would read as the terminator.
                    continue;
                }
                io.write_all(&encoder::encode_chunk(&chunk)).await?;
            }
            io.write_all(&encoder::encode_chunk_terminator()).await
        }
    }
}
