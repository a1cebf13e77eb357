// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod addr;
pub mod aio;
pub mod shim;

pub use addr::SocketAddress;
pub use aio::{AsyncSocket, DatagramMessage};
pub use shim::PacketInfo;

use crate::fail::Fail;

use libc::c_int;

use std::{mem, os::unix::io::RawFd};

//==============================================================================
// Constants & Structures
//==============================================================================

/// An owned, exclusively held file descriptor. The descriptor is closed
/// exactly once: either by the explicit consuming [close](Socket::close) or
/// when the socket is dropped.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Socket].
impl Socket {
    /// Creates a byte-stream socket in the given family.
    pub fn stream(family: c_int) -> Result<Self, Fail> {
        let fd = shim::socket(family, libc::SOCK_STREAM, 0)?;
        let socket = Self { fd };
        socket.set_nosigpipe()?;
        Ok(socket)
    }

    /// Creates a datagram socket in the given family.
    pub fn datagram(family: c_int) -> Result<Self, Fail> {
        let fd = shim::socket(family, libc::SOCK_DGRAM, 0)?;
        let socket = Self { fd };
        socket.set_nosigpipe()?;
        Ok(socket)
    }

    /// Creates a pair of connected UNIX-domain stream sockets.
    pub fn pair() -> Result<(Self, Self), Fail> {
        let (a, b) = shim::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0)?;
        Ok((Self { fd: a }, Self { fd: b }))
    }

    /// Wraps an already-open descriptor, taking ownership of it.
    pub fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Returns the raw descriptor of the target socket.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn set_nonblocking(&self) -> Result<(), Fail> {
        shim::set_nonblocking(self.fd)
    }

    pub fn set_reuseaddr(&self) -> Result<(), Fail> {
        shim::setsockopt_int(self.fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)
    }

    /// Suppresses SIGPIPE on Darwin, where `MSG_NOSIGNAL` is unavailable.
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub fn set_nosigpipe(&self) -> Result<(), Fail> {
        shim::setsockopt_int(self.fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
    }

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    pub fn set_nosigpipe(&self) -> Result<(), Fail> {
        Ok(())
    }

    /// Enables destination-address reporting for [recv_message][aio].
    pub fn set_packet_info(&self, family: c_int) -> Result<(), Fail> {
        shim::enable_packet_info(self.fd, family)
    }

    /// Binds the target socket to `local`. A stale UNIX-domain socket file is
    /// unlinked first so rebinding after an unclean exit succeeds.
    pub fn bind(&self, local: &SocketAddress) -> Result<(), Fail> {
        if let SocketAddress::Unix { path } = local {
            match shim::unlink(path) {
                Ok(()) => debug!("removed stale socket file {:?}", path),
                Err(_) => (),
            }
        }
        let (ss, len) = local.encode()?;
        shim::bind(self.fd, &ss, len)
    }

    pub fn listen(&self, backlog: usize) -> Result<(), Fail> {
        shim::listen(self.fd, backlog as c_int)
    }

    /// Accepts one pending connection. [Fail::WouldBlock] when none is queued.
    pub fn accept(&self) -> Result<(Socket, SocketAddress), Fail> {
        let (fd, ss, len) = shim::accept(self.fd)?;
        let socket = Socket { fd };
        let peer = SocketAddress::decode(&ss, len)?;
        socket.set_nosigpipe()?;
        Ok((socket, peer))
    }

    /// Starts connecting to `remote`. [Fail::WouldBlock] while in progress;
    /// completion is read back through [take_error](Socket::take_error).
    pub fn connect(&self, remote: &SocketAddress) -> Result<(), Fail> {
        let (ss, len) = remote.encode()?;
        shim::connect(self.fd, &ss, len)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        shim::read(self.fd, buf)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, Fail> {
        shim::write(self.fd, buf)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddress), Fail> {
        let (n, ss, len) = shim::recvfrom(self.fd, buf)?;
        Ok((n, SocketAddress::decode(&ss, len)?))
    }

    pub fn send_to(&self, buf: &[u8], remote: &SocketAddress) -> Result<usize, Fail> {
        let (ss, len) = remote.encode()?;
        shim::sendto(self.fd, buf, &ss, len)
    }

    /// Returns and clears the pending socket error.
    pub fn take_error(&self) -> Result<i32, Fail> {
        shim::so_error(self.fd)
    }

    /// Returns the concrete local address, with the port resolved if the
    /// socket was bound to port zero.
    pub fn local_address(&self) -> Result<SocketAddress, Fail> {
        let (ss, len) = shim::getsockname(self.fd)?;
        SocketAddress::decode(&ss, len)
    }

    pub fn peer_address(&self) -> Result<SocketAddress, Fail> {
        let (ss, len) = shim::getpeername(self.fd)?;
        SocketAddress::decode(&ss, len)
    }

    /// Closes the target socket now, consuming it.
    pub fn close(self) -> Result<(), Fail> {
        let fd = self.fd;
        mem::forget(self);
        shim::close(fd)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Drop trait implementation for [Socket].
impl Drop for Socket {
    fn drop(&mut self) {
        if let Err(e) = shim::close(self.fd) {
            warn!("failed to close socket {} ({:?})", self.fd, e);
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    /// Tests that a bound socket reports a concrete port.
    #[test]
    fn socket_bind_resolves_port() {
        let socket = Socket::stream(libc::AF_INET).unwrap();
        socket.set_reuseaddr().unwrap();
        let local = SocketAddress::inet(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        socket.bind(&local).unwrap();
        let bound = socket.local_address().unwrap();
        assert_ne!(bound.port(), Some(0));
    }

    /// Tests that a socket pair moves bytes both ways.
    #[test]
    fn socket_pair_transfers() {
        let (a, b) = Socket::pair().unwrap();
        a.write(b"ping").unwrap();
        let mut buf = [0u8; 8];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }
}
