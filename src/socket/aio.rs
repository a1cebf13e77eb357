// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Suspending byte-stream and datagram operations on top of [Socket] and the
//! polling pool. Every syscall is attempted once; `EWOULDBLOCK` parks the
//! task for the matching readiness event and retries; `EINTR` is retried
//! inside the shim; every other failure propagates typed.

use super::{shim::PacketInfo, Socket, SocketAddress};
use crate::{
    fail::Fail,
    poll::{Event, SocketPool},
};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};

use std::{os::unix::io::RawFd, rc::Rc};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Deregisters the fd from the pool when the wrapper goes away, waking any
/// waiter still parked on it as disconnected. Declared before the socket so
/// the pool learns of the teardown before the descriptor is closed.
struct FdGuard {
    fd: RawFd,
    pool: Rc<SocketPool>,
}

/// A non-blocking socket whose operations suspend instead of failing with
/// `EWOULDBLOCK`.
pub struct AsyncSocket {
    registration: FdGuard,
    socket: Socket,
}

/// A received datagram, with the control-message payload when the socket has
/// packet-info reporting enabled.
pub struct DatagramMessage {
    pub data: Bytes,
    pub sender: SocketAddress,
    pub pktinfo: Option<PacketInfo>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [AsyncSocket].
impl AsyncSocket {
    /// Wraps `socket`, switching it to non-blocking mode.
    pub fn new(socket: Socket, pool: Rc<SocketPool>) -> Result<Self, Fail> {
        socket.set_nonblocking()?;
        let registration = FdGuard { fd: socket.fd(), pool };
        Ok(Self { registration, socket })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn local_address(&self) -> Result<SocketAddress, Fail> {
        self.socket.local_address()
    }

    pub fn peer_address(&self) -> Result<SocketAddress, Fail> {
        self.socket.peer_address()
    }

    /// Parks the calling task until the socket is readable.
    pub async fn readable(&self) -> Result<(), Fail> {
        self.registration.pool.suspend(self.socket.fd(), Event::Readable).await
    }

    /// Parks the calling task until the socket is writable.
    pub async fn writable(&self) -> Result<(), Fail> {
        self.registration.pool.suspend(self.socket.fd(), Event::Writable).await
    }

    /// Reads once into `buf`. Zero means EOF.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        loop {
            match self.socket.read(buf) {
                Err(Fail::WouldBlock {}) => self.readable().await?,
                other => return other,
            }
        }
    }

    /// Reads a single byte; `None` on EOF.
    pub async fn read_byte(&self) -> Result<Option<u8>, Fail> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf).await? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    /// Fills `buf` completely; an early EOF is a disconnect.
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<(), Fail> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]).await? {
                0 => return Err(Fail::Disconnected {}),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Reads whatever is available, up to `max` bytes; `None` on EOF.
    pub async fn read_chunk(&self, max: usize) -> Result<Option<Bytes>, Fail> {
        let mut buf = BytesMut::with_capacity(max);
        buf.resize(max, 0);
        match self.read(&mut buf[..]).await? {
            0 => Ok(None),
            n => {
                buf.truncate(n);
                Ok(Some(buf.freeze()))
            }
        }
    }

    /// Writes all of `buf`, suspending between partial writes.
    pub async fn write_all(&self, buf: &[u8]) -> Result<(), Fail> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            match self.socket.write(remaining) {
                Ok(0) => return Err(Fail::Disconnected {}),
                Ok(n) => remaining = &remaining[n..],
                Err(Fail::WouldBlock {}) => self.writable().await?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Accepts one connection, wrapping it on the same pool.
    pub async fn accept(&self) -> Result<(AsyncSocket, SocketAddress), Fail> {
        loop {
            match self.socket.accept() {
                Ok((socket, peer)) => {
                    let wrapped = AsyncSocket::new(socket, self.registration.pool.clone())?;
                    return Ok((wrapped, peer));
                }
                Err(Fail::WouldBlock {}) => self.readable().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Connects `socket` to `remote`, resolving the in-progress case through
    /// writability plus `SO_ERROR`.
    pub async fn connect(
        socket: Socket,
        remote: &SocketAddress,
        pool: Rc<SocketPool>,
    ) -> Result<AsyncSocket, Fail> {
        let wrapped = AsyncSocket::new(socket, pool)?;
        match wrapped.socket.connect(remote) {
            Ok(()) => Ok(wrapped),
            Err(Fail::WouldBlock {}) => {
                wrapped.writable().await?;
                match wrapped.socket.take_error()? {
                    0 => Ok(wrapped),
                    e if e == libc::ECONNREFUSED || e == libc::ECONNRESET => {
                        Err(Fail::Disconnected {})
                    }
                    errno => Err(Fail::Syscall { errno, ctx: "connect" }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Receives one datagram of up to `max` bytes.
    pub async fn recv_from(&self, max: usize) -> Result<(Bytes, SocketAddress), Fail> {
        loop {
            let mut buf = BytesMut::with_capacity(max);
            buf.resize(max, 0);
            match self.socket.recv_from(&mut buf[..]) {
                Ok((n, sender)) => {
                    buf.truncate(n);
                    return Ok((buf.freeze(), sender));
                }
                Err(Fail::WouldBlock {}) => self.readable().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one datagram to `remote`.
    pub async fn send_to(&self, buf: &[u8], remote: &SocketAddress) -> Result<(), Fail> {
        loop {
            match self.socket.send_to(buf, remote) {
                Ok(_) => return Ok(()),
                Err(Fail::WouldBlock {}) => self.writable().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Receives one datagram together with its control-message payload.
    pub async fn recv_message(&self, max: usize) -> Result<DatagramMessage, Fail> {
        loop {
            let mut buf = BytesMut::with_capacity(max);
            buf.resize(max, 0);
            match super::shim::recvmsg(self.socket.fd(), &mut buf[..]) {
                Ok(message) => {
                    buf.truncate(message.len);
                    let sender = SocketAddress::decode(&message.addr, message.addrlen)?;
                    return Ok(DatagramMessage {
                        data: buf.freeze(),
                        sender,
                        pktinfo: message.pktinfo,
                    });
                }
                Err(Fail::WouldBlock {}) => self.readable().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one datagram through `sendmsg`, to `remote` or to the connected
    /// peer when `remote` is `None`.
    pub async fn send_message(
        &self,
        buf: &[u8],
        remote: Option<&SocketAddress>,
    ) -> Result<usize, Fail> {
        let encoded = match remote {
            Some(addr) => Some(addr.encode()?),
            None => None,
        };
        loop {
            let addr = encoded.as_ref().map(|(ss, len)| (ss, *len));
            match super::shim::sendmsg(self.socket.fd(), buf, addr) {
                Ok(n) => return Ok(n),
                Err(Fail::WouldBlock {}) => self.writable().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// The sequence of connections accepted on a listening socket. Ends when
    /// the listener is torn down or the pool closes.
    pub fn accepted(&self) -> impl Stream<Item = Result<(AsyncSocket, SocketAddress), Fail>> + '_ {
        stream::unfold(self, |listener| async move {
            match listener.accept().await {
                Ok(pair) => Some((Ok(pair), listener)),
                Err(Fail::Disconnected {}) | Err(Fail::PoolClosed {}) => None,
                Err(e) => Some((Err(e), listener)),
            }
        })
    }

    /// The sequence of datagrams received on this socket.
    pub fn messages(&self, max: usize) -> impl Stream<Item = Result<DatagramMessage, Fail>> + '_ {
        stream::unfold(self, move |socket| async move {
            match socket.recv_message(max).await {
                Ok(message) => Some((Ok(message), socket)),
                Err(Fail::Disconnected {}) | Err(Fail::PoolClosed {}) => None,
                Err(e) => Some((Err(e), socket)),
            }
        })
    }

    /// Unwraps the underlying socket, releasing its pool registration first.
    /// Protocol upgrades use this to take the connection out of HTTP framing.
    pub fn into_socket(self) -> Socket {
        let Self { registration, socket } = self;
        drop(registration);
        socket
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Drop trait implementation for [FdGuard].
impl Drop for FdGuard {
    fn drop(&mut self) {
        self.pool.deregister_fd(self.fd);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Executor;
    use std::net::{IpAddr, Ipv4Addr};

    /// Tests suspending reads and writes across a socket pair.
    #[test]
    fn aio_pair_echo() {
        let mut executor = Executor::new().unwrap();
        let rt = executor.runtime();
        let (a, b) = Socket::pair().unwrap();
        let pool = rt.sockets().clone();
        let a = AsyncSocket::new(a, pool.clone()).unwrap();
        let b = AsyncSocket::new(b, pool).unwrap();

        rt.spawn(async move {
            let mut buf = [0u8; 5];
            b.read_exact(&mut buf).await.unwrap();
            b.write_all(&buf).await.unwrap();
        })
        .unwrap();

        let echoed = executor
            .block_on(async move {
                a.write_all(b"hello").await.unwrap();
                let mut buf = [0u8; 5];
                a.read_exact(&mut buf).await.unwrap();
                buf
            })
            .unwrap();
        assert_eq!(&echoed, b"hello");
    }

    /// Tests asynchronous accept/connect over loopback.
    #[test]
    fn aio_accept_connect() {
        let mut executor = Executor::new().unwrap();
        let rt = executor.runtime();
        let pool = rt.sockets().clone();

        let listener = Socket::stream(libc::AF_INET).unwrap();
        listener.set_reuseaddr().unwrap();
        listener.bind(&SocketAddress::inet(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
        listener.listen(8).unwrap();
        let remote = listener.local_address().unwrap();
        let listener = AsyncSocket::new(listener, pool.clone()).unwrap();

        let client_pool = pool.clone();
        rt.spawn(async move {
            let socket = Socket::stream(libc::AF_INET).unwrap();
            let client = AsyncSocket::connect(socket, &remote, client_pool).await.unwrap();
            client.write_all(b"hi").await.unwrap();
            // Hold the connection open until the server has read.
            let mut buf = [0u8; 2];
            client.read_exact(&mut buf).await.unwrap();
        })
        .unwrap();

        executor
            .block_on(async move {
                let (conn, _peer) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2];
                conn.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, b"hi");
                conn.write_all(b"ok").await.unwrap();
            })
            .unwrap();
    }

    /// Tests datagram send/receive with sender reporting.
    #[test]
    fn aio_datagram_roundtrip() {
        let mut executor = Executor::new().unwrap();
        let rt = executor.runtime();
        let pool = rt.sockets().clone();

        let receiver = Socket::datagram(libc::AF_INET).unwrap();
        receiver.bind(&SocketAddress::inet(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
        let target = receiver.local_address().unwrap();
        let receiver = AsyncSocket::new(receiver, pool.clone()).unwrap();

        let sender = Socket::datagram(libc::AF_INET).unwrap();
        sender.bind(&SocketAddress::inet(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
        let sender = AsyncSocket::new(sender, pool).unwrap();

        executor
            .block_on(async move {
                sender.send_to(b"ping", &target).await.unwrap();
                let (data, from) = receiver.recv_from(64).await.unwrap();
                assert_eq!(&data[..], b"ping");
                assert_eq!(from.port(), sender.local_address().unwrap().port());
            })
            .unwrap();
    }
}
