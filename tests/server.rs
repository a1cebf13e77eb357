// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use catwalk::{
    handler, http::range::apply_range, Executor, HttpServer, Response, Runtime, ServerConfig,
    SocketAddress,
};

use bytes::Bytes;
use futures::stream::StreamExt;

use std::{
    net::{IpAddr, Ipv4Addr},
    thread,
    time::{Duration, Instant},
};

mod common;

use common::*;

const PORT_BASE: u16 = 49450;

//==============================================================================
// Harness
//==============================================================================

fn address(port: u16) -> SocketAddress {
    SocketAddress::inet(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Runs a server on the current thread and a client on a helper thread; the
/// server stops once the client is done, and both sides' panics fail the
/// test.
fn serve<R, C>(port: u16, timeout: Duration, routes: R, client: C)
where
    R: FnOnce(&HttpServer, &Runtime),
    C: FnOnce(u16) + Send + 'static,
{
    catwalk::logging::initialize();
    let mut executor = Executor::new().unwrap();
    let rt = executor.runtime();
    let server = HttpServer::new(ServerConfig::new(address(port)).timeout(timeout), rt.clone());
    routes(&server, &rt);

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let client_thread = thread::spawn(move || {
        let _guard = DoneGuard(done_tx);
        client(port);
    });

    let stopper = server.clone();
    let stopper_rt = rt.clone();
    rt.spawn(async move {
        while done_rx.try_recv().is_err() {
            if stopper_rt.sleep(Duration::from_millis(10)).await.is_err() {
                return;
            }
        }
        let _ = stopper.stop(Duration::from_secs(1)).await;
    })
    .unwrap();

    executor
        .block_on(async move { server.run().await })
        .unwrap()
        .unwrap();
    client_thread.join().unwrap();
}

//==============================================================================
// Keep-Alive
//==============================================================================

/// Tests that pipelined requests on one connection are answered in order and
/// that the connection survives them.
fn do_keep_alive(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route(
                    "GET /:name",
                    handler(|req| {
                        let name = req.param("name").unwrap_or("?").to_string();
                        async move { Ok(Response::with_body(200, Bytes::from(name))) }
                    }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(
                &mut stream,
                b"GET /x HTTP/1.1\r\nHost: h\r\n\r\nGET /y HTTP/1.1\r\nHost: h\r\n\r\n",
            );
            let first = read_response(&mut stream);
            assert_eq!(first.status, 200);
            assert_eq!(&first.body, b"x");
            let second = read_response(&mut stream);
            assert_eq!(second.status, 200);
            assert_eq!(&second.body, b"y");

            // Still open: a third exchange goes through.
            send(&mut stream, b"GET /z HTTP/1.1\r\nHost: h\r\n\r\n");
            let third = read_response(&mut stream);
            assert_eq!(&third.body, b"z");
        },
    );
}

#[test]
fn catwalk_keep_alive_ordering() {
    do_keep_alive(PORT_BASE);
}

//==============================================================================
// Range
//==============================================================================

/// Tests a satisfied byte range against a 100-byte resource.
fn do_range(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route(
                    "GET /file",
                    handler(|req| {
                        let response = apply_range(&req, Bytes::from(vec![9u8; 100]));
                        async move { Ok(response) }
                    }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(
                &mut stream,
                b"GET /file HTTP/1.1\r\nHost: h\r\nRange: bytes=10-19\r\n\r\n",
            );
            let response = read_response(&mut stream);
            assert_eq!(response.status, 206);
            assert_eq!(response.header("Content-Range"), Some("bytes 10-19/100"));
            assert_eq!(response.body.len(), 10);
        },
    );
}

#[test]
fn catwalk_range_request() {
    do_range(PORT_BASE + 1);
}

//==============================================================================
// Chunked Upload
//==============================================================================

/// Tests that a chunked request body reaches the handler reassembled.
fn do_chunked_upload(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route(
                    "POST /upload",
                    handler(|req| {
                        let body = req.body().clone();
                        async move {
                            let bytes = body.read_all(1 << 20).await?;
                            Ok(Response::with_body(200, bytes))
                        }
                    }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(
                &mut stream,
                b"POST /upload HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n\
                  5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            );
            let response = read_response(&mut stream);
            assert_eq!(response.status, 200);
            assert_eq!(&response.body, b"hello world");
        },
    );
}

#[test]
fn catwalk_chunked_upload() {
    do_chunked_upload(PORT_BASE + 2);
}

//==============================================================================
// Handler Timeout
//==============================================================================

/// Tests that a handler overshooting the request timeout yields a 500 and a
/// closed connection.
fn do_handler_timeout(port: u16) {
    serve(
        port,
        Duration::from_millis(100),
        |server, rt| {
            let rt = rt.clone();
            server
                .route(
                    "GET /slow",
                    handler(move |_req| {
                        let rt = rt.clone();
                        async move {
                            let _ = rt.sleep(Duration::from_secs(10)).await;
                            Ok(Response::new(200))
                        }
                    }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(&mut stream, b"GET /slow HTTP/1.1\r\nHost: h\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 500);
            expect_eof(&mut stream);
        },
    );
}

#[test]
fn catwalk_handler_timeout() {
    do_handler_timeout(PORT_BASE + 3);
}

//==============================================================================
// Graceful Stop
//==============================================================================

/// Tests that stop(1s) closes ten idle keep-alive connections promptly and
/// `run` returns cleanly.
fn do_graceful_stop(port: u16) {
    catwalk::logging::initialize();
    let mut executor = Executor::new().unwrap();
    let rt = executor.runtime();
    let server = HttpServer::new(
        ServerConfig::new(address(port)).timeout(Duration::from_secs(5)),
        rt.clone(),
    );
    server
        .route("GET /x", handler(|_req| async { Ok(Response::new(200)) }))
        .unwrap();

    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(16);
    let mut clients = Vec::new();
    for _ in 0..10 {
        let ready_tx = ready_tx.clone();
        clients.push(thread::spawn(move || {
            let mut stream = connect(port);
            send(&mut stream, b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 200);
            ready_tx.send(()).unwrap();
            // Idle until the server shuts the connection down.
            expect_closed(&mut stream);
        }));
    }

    let stopper = server.clone();
    let stopper_rt = rt.clone();
    rt.spawn(async move {
        let mut ready = 0;
        while ready < 10 {
            if ready_rx.try_recv().is_ok() {
                ready += 1;
                continue;
            }
            if stopper_rt.sleep(Duration::from_millis(10)).await.is_err() {
                return;
            }
        }
        let _ = stopper.stop(Duration::from_secs(1)).await;
    })
    .unwrap();

    let started = Instant::now();
    executor
        .block_on(async move { server.run().await })
        .unwrap()
        .unwrap();
    for client in clients {
        client.join().unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(8), "stop was not graceful in time");
}

#[test]
fn catwalk_graceful_stop() {
    do_graceful_stop(PORT_BASE + 4);
}

//==============================================================================
// Route Precedence
//==============================================================================

/// Tests that insertion order wins: `GET /a/*` registered before `GET /a/b`
/// captures `/a/b`.
fn do_route_precedence(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route(
                    "GET /a/*",
                    handler(|_req| async { Ok(Response::with_body(200, &b"wild"[..])) }),
                )
                .unwrap();
            server
                .route(
                    "GET /a/b",
                    handler(|_req| async { Ok(Response::with_body(200, &b"exact"[..])) }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(&mut stream, b"GET /a/b HTTP/1.1\r\nHost: h\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(&response.body, b"wild");
        },
    );
}

#[test]
fn catwalk_route_precedence() {
    do_route_precedence(PORT_BASE + 5);
}

//==============================================================================
// Protocol Upgrade
//==============================================================================

/// Tests the 101 path: the handler takes the raw socket and speaks its own
/// protocol over it.
fn do_upgrade(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route(
                    "GET /echo",
                    handler(|_req| async {
                        let response = Response::new(101)
                            .header("Upgrade", "echo")?
                            .header("Connection", "Upgrade")?
                            .with_upgrade(|socket| async move {
                                let mut buf = [0u8; 5];
                                socket.read_exact(&mut buf).await?;
                                assert_eq!(&buf, b"ping\n");
                                socket.write_all(b"pong\n").await?;
                                Ok(())
                            });
                        Ok(response)
                    }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(
                &mut stream,
                b"GET /echo HTTP/1.1\r\nHost: h\r\nUpgrade: echo\r\nConnection: Upgrade\r\n\r\n",
            );
            let response = read_response(&mut stream);
            assert_eq!(response.status, 101);
            assert_eq!(response.header("Upgrade"), Some("echo"));

            send(&mut stream, b"ping\n");
            let mut buf = [0u8; 5];
            std::io::Read::read_exact(&mut stream, &mut buf).unwrap();
            assert_eq!(&buf, b"pong\n");
        },
    );
}

#[test]
fn catwalk_protocol_upgrade() {
    do_upgrade(PORT_BASE + 6);
}

//==============================================================================
// Streamed Response
//==============================================================================

/// Tests that an unknown-length streamed body goes out chunked and
/// reassembles on the client.
fn do_streamed_response(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route(
                    "GET /stream",
                    handler(|_req| async {
                        let chunks = vec![
                            Ok(Bytes::from_static(b"alpha ")),
                            Ok(Bytes::from_static(b"beta ")),
                            Ok(Bytes::from_static(b"gamma")),
                        ];
                        let stream = futures::stream::iter(chunks).boxed_local();
                        Ok(Response::with_stream(200, None, stream))
                    }),
                )
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(&mut stream, b"GET /stream HTTP/1.1\r\nHost: h\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 200);
            assert_eq!(response.header("Transfer-Encoding"), Some("chunked"));
            assert_eq!(&response.body, b"alpha beta gamma");
        },
    );
}

#[test]
fn catwalk_streamed_response() {
    do_streamed_response(PORT_BASE + 7);
}

//==============================================================================
// Error Mapping
//==============================================================================

/// Tests the driver's status mapping: 400 for garbage, 404 for no route.
fn do_error_mapping(port: u16) {
    serve(
        port,
        Duration::from_secs(5),
        |server, _rt| {
            server
                .route("GET /known", handler(|_req| async { Ok(Response::new(200)) }))
                .unwrap();
        },
        |port| {
            let mut stream = connect(port);
            send(&mut stream, b"NONSENSE\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 400);
            expect_eof(&mut stream);

            let mut stream = connect(port);
            send(&mut stream, b"GET /unknown HTTP/1.1\r\nHost: h\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 404);
            // A 404 is not a connection failure; keep-alive holds.
            send(&mut stream, b"GET /known HTTP/1.1\r\nHost: h\r\n\r\n");
            let response = read_response(&mut stream);
            assert_eq!(response.status, 200);
        },
    );
}

#[test]
fn catwalk_error_mapping() {
    do_error_mapping(PORT_BASE + 8);
}

//==============================================================================
// Stop Deadline
//==============================================================================

/// Tests that stop honors its deadline even when a handler never returns.
fn do_stop_deadline(port: u16) {
    catwalk::logging::initialize();
    let mut executor = Executor::new().unwrap();
    let rt = executor.runtime();
    let server = HttpServer::new(
        ServerConfig::new(address(port)).timeout(Duration::from_secs(60)),
        rt.clone(),
    );
    let hrt = rt.clone();
    server
        .route(
            "GET /hang",
            handler(move |_req| {
                let rt = hrt.clone();
                async move {
                    let _ = rt.sleep(Duration::from_secs(60)).await;
                    Ok(Response::new(200))
                }
            }),
        )
        .unwrap();

    let (sent_tx, sent_rx) = crossbeam_channel::bounded::<()>(1);
    let client = thread::spawn(move || {
        let mut stream = connect(port);
        send(&mut stream, b"GET /hang HTTP/1.1\r\nHost: h\r\n\r\n");
        sent_tx.send(()).unwrap();
        expect_closed(&mut stream);
    });

    let stopper = server.clone();
    let stopper_rt = rt.clone();
    rt.spawn(async move {
        while sent_rx.try_recv().is_err() {
            if stopper_rt.sleep(Duration::from_millis(10)).await.is_err() {
                return;
            }
        }
        // Give the request a moment to reach its handler.
        let _ = stopper_rt.sleep(Duration::from_millis(100)).await;
        let _ = stopper.stop(Duration::from_millis(300)).await;
    })
    .unwrap();

    let started = Instant::now();
    executor
        .block_on(async move { server.run().await })
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5), "stop ignored its deadline");
    client.join().unwrap();
}

#[test]
fn catwalk_stop_deadline() {
    do_stop_deadline(PORT_BASE + 9);
}
