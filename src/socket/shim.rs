// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Thin wrappers around the POSIX socket surface. Each wrapper makes exactly
//! one attempt (`EINTR` excepted), and maps failures into [Fail]: readiness
//! exhaustion becomes [Fail::WouldBlock] so the asynchronous layer can
//! suspend, peer teardown becomes [Fail::Disconnected], and everything else
//! carries the raw errno together with a static context string.

use crate::fail::Fail;

use libc::{c_int, c_void, sockaddr, sockaddr_storage, socklen_t};

use std::{
    ffi::CString,
    mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    os::unix::ffi::OsStrExt,
    os::unix::io::RawFd,
    path::Path,
    ptr,
};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Control-message payload of a received datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketInfo {
    /// Local address the datagram was delivered to.
    pub local_addr: IpAddr,
    /// Interface index the datagram arrived on.
    pub interface: u32,
}

/// Result of a `recvmsg` call.
pub struct ReceivedMessage {
    pub len: usize,
    pub addr: sockaddr_storage,
    pub addrlen: socklen_t,
    pub pktinfo: Option<PacketInfo>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const IPV4_RECVPKTINFO: c_int = libc::IP_PKTINFO;
#[cfg(any(target_os = "linux", target_os = "android"))]
const IPV4_PKTINFO: c_int = libc::IP_PKTINFO;
#[cfg(any(target_os = "linux", target_os = "android"))]
const IPV6_RECVPKTINFO: c_int = libc::IPV6_RECVPKTINFO;
#[cfg(any(target_os = "linux", target_os = "android"))]
const IPV6_PKTINFO: c_int = libc::IPV6_PKTINFO;

// Darwin spells the enable and the payload type with the same value.
#[cfg(any(target_os = "macos", target_os = "ios"))]
const IPV4_RECVPKTINFO: c_int = 26;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const IPV4_PKTINFO: c_int = 26;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const IPV6_RECVPKTINFO: c_int = 61;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const IPV6_PKTINFO: c_int = 46;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Returns the calling thread's last errno.
pub fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn map_data_err(ctx: &'static str) -> Fail {
    match errno() {
        e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => Fail::WouldBlock {},
        e if e == libc::ECONNRESET || e == libc::EPIPE || e == libc::ENOTCONN => {
            Fail::Disconnected {}
        }
        errno => Fail::Syscall { errno, ctx },
    }
}

pub fn socket(domain: c_int, ty: c_int, protocol: c_int) -> Result<RawFd, Fail> {
    let fd = unsafe { libc::socket(domain, ty, protocol) };
    if fd < 0 {
        return Err(Fail::last_os("socket"));
    }
    Ok(fd)
}

pub fn socketpair(domain: c_int, ty: c_int, protocol: c_int) -> Result<(RawFd, RawFd), Fail> {
    let mut fds: [c_int; 2] = [0; 2];
    if unsafe { libc::socketpair(domain, ty, protocol, fds.as_mut_ptr()) } < 0 {
        return Err(Fail::last_os("socketpair"));
    }
    Ok((fds[0], fds[1]))
}

pub fn bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> Result<(), Fail> {
    let rc = unsafe { libc::bind(fd, addr as *const sockaddr_storage as *const sockaddr, len) };
    if rc < 0 {
        return Err(Fail::last_os("bind"));
    }
    Ok(())
}

pub fn listen(fd: RawFd, backlog: c_int) -> Result<(), Fail> {
    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(Fail::last_os("listen"));
    }
    Ok(())
}

pub fn accept(fd: RawFd) -> Result<(RawFd, sockaddr_storage, socklen_t), Fail> {
    loop {
        let mut ss: sockaddr_storage = unsafe { mem::zeroed() };
        let mut len: socklen_t = mem::size_of::<sockaddr_storage>() as socklen_t;
        let rc = unsafe { libc::accept(fd, &mut ss as *mut sockaddr_storage as *mut sockaddr, &mut len) };
        if rc >= 0 {
            return Ok((rc, ss, len));
        }
        match errno() {
            e if e == libc::EINTR => continue,
            e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => return Err(Fail::WouldBlock {}),
            errno => return Err(Fail::Syscall { errno, ctx: "accept" }),
        }
    }
}

/// Initiates a nonblocking connect. `EINPROGRESS` surfaces as
/// [Fail::WouldBlock]; completion is observed through [so_error] once the
/// socket reports writability.
pub fn connect(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> Result<(), Fail> {
    let rc = unsafe { libc::connect(fd, addr as *const sockaddr_storage as *const sockaddr, len) };
    if rc == 0 {
        return Ok(());
    }
    match errno() {
        e if e == libc::EINPROGRESS || e == libc::EINTR || e == libc::EAGAIN => {
            Err(Fail::WouldBlock {})
        }
        e if e == libc::EISCONN => Ok(()),
        e if e == libc::ECONNREFUSED || e == libc::ECONNRESET => Err(Fail::Disconnected {}),
        errno => Err(Fail::Syscall { errno, ctx: "connect" }),
    }
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, Fail> {
    loop {
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        if errno() == libc::EINTR {
            continue;
        }
        return Err(map_data_err("read"));
    }
}

pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, Fail> {
    loop {
        let rc = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        if errno() == libc::EINTR {
            continue;
        }
        return Err(map_data_err("write"));
    }
}

pub fn close(fd: RawFd) -> Result<(), Fail> {
    if unsafe { libc::close(fd) } < 0 {
        return Err(Fail::last_os("close"));
    }
    Ok(())
}

pub fn shutdown(fd: RawFd, how: c_int) -> Result<(), Fail> {
    if unsafe { libc::shutdown(fd, how) } < 0 {
        return Err(Fail::last_os("shutdown"));
    }
    Ok(())
}

pub fn set_nonblocking(fd: RawFd) -> Result<(), Fail> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Fail::last_os("fcntl(F_GETFL)"));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Fail::last_os("fcntl(F_SETFL)"));
    }
    Ok(())
}

pub fn setsockopt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> Result<(), Fail> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc < 0 {
        return Err(Fail::last_os("setsockopt"));
    }
    Ok(())
}

pub fn getsockopt_int(fd: RawFd, level: c_int, name: c_int) -> Result<c_int, Fail> {
    let mut value: c_int = 0;
    let mut len: socklen_t = mem::size_of::<c_int>() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(fd, level, name, &mut value as *mut c_int as *mut c_void, &mut len)
    };
    if rc < 0 {
        return Err(Fail::last_os("getsockopt"));
    }
    Ok(value)
}

/// Reads and clears the socket's pending error, as left behind by an
/// asynchronous connect.
pub fn so_error(fd: RawFd) -> Result<i32, Fail> {
    getsockopt_int(fd, libc::SOL_SOCKET, libc::SO_ERROR)
}

pub fn getsockname(fd: RawFd) -> Result<(sockaddr_storage, socklen_t), Fail> {
    let mut ss: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len: socklen_t = mem::size_of::<sockaddr_storage>() as socklen_t;
    let rc =
        unsafe { libc::getsockname(fd, &mut ss as *mut sockaddr_storage as *mut sockaddr, &mut len) };
    if rc < 0 {
        return Err(Fail::last_os("getsockname"));
    }
    Ok((ss, len))
}

pub fn getpeername(fd: RawFd) -> Result<(sockaddr_storage, socklen_t), Fail> {
    let mut ss: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len: socklen_t = mem::size_of::<sockaddr_storage>() as socklen_t;
    let rc =
        unsafe { libc::getpeername(fd, &mut ss as *mut sockaddr_storage as *mut sockaddr, &mut len) };
    if rc < 0 {
        return Err(Fail::last_os("getpeername"));
    }
    Ok((ss, len))
}

pub fn recvfrom(fd: RawFd, buf: &mut [u8]) -> Result<(usize, sockaddr_storage, socklen_t), Fail> {
    loop {
        let mut ss: sockaddr_storage = unsafe { mem::zeroed() };
        let mut len: socklen_t = mem::size_of::<sockaddr_storage>() as socklen_t;
        let rc = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                0,
                &mut ss as *mut sockaddr_storage as *mut sockaddr,
                &mut len,
            )
        };
        if rc >= 0 {
            return Ok((rc as usize, ss, len));
        }
        if errno() == libc::EINTR {
            continue;
        }
        return Err(map_data_err("recvfrom"));
    }
}

pub fn sendto(
    fd: RawFd,
    buf: &[u8],
    addr: &sockaddr_storage,
    len: socklen_t,
) -> Result<usize, Fail> {
    loop {
        let rc = unsafe {
            libc::sendto(
                fd,
                buf.as_ptr() as *const c_void,
                buf.len(),
                0,
                addr as *const sockaddr_storage as *const sockaddr,
                len,
            )
        };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        if errno() == libc::EINTR {
            continue;
        }
        return Err(map_data_err("sendto"));
    }
}

/// Enables delivery of destination-address control messages on a datagram
/// socket, so [recvmsg] can report which local address a packet targeted.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
))]
pub fn enable_packet_info(fd: RawFd, family: c_int) -> Result<(), Fail> {
    match family {
        libc::AF_INET => setsockopt_int(fd, libc::IPPROTO_IP, IPV4_RECVPKTINFO, 1),
        libc::AF_INET6 => setsockopt_int(fd, libc::IPPROTO_IPV6, IPV6_RECVPKTINFO, 1),
        _ => Err(Fail::UnsupportedAddress {}),
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub fn enable_packet_info(_fd: RawFd, _family: c_int) -> Result<(), Fail> {
    Err(Fail::Invalid { details: "packet info not supported on this platform" })
}

pub fn recvmsg(fd: RawFd, buf: &mut [u8]) -> Result<ReceivedMessage, Fail> {
    loop {
        let mut ss: sockaddr_storage = unsafe { mem::zeroed() };
        let mut control: [u8; 128] = [0; 128];
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut ss as *mut sockaddr_storage as *mut c_void;
        msg.msg_namelen = mem::size_of::<sockaddr_storage>() as socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let rc = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if rc < 0 {
            if errno() == libc::EINTR {
                continue;
            }
            return Err(map_data_err("recvmsg"));
        }
        let pktinfo = parse_packet_info(&msg);
        return Ok(ReceivedMessage {
            len: rc as usize,
            addr: ss,
            addrlen: msg.msg_namelen,
            pktinfo,
        });
    }
}

pub fn sendmsg(
    fd: RawFd,
    buf: &[u8],
    addr: Option<(&sockaddr_storage, socklen_t)>,
) -> Result<usize, Fail> {
    loop {
        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        if let Some((ss, len)) = addr {
            msg.msg_name = ss as *const sockaddr_storage as *mut c_void;
            msg.msg_namelen = len;
        } else {
            msg.msg_name = ptr::null_mut();
            msg.msg_namelen = 0;
        }
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        let rc = unsafe { libc::sendmsg(fd, &msg, 0) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        if errno() == libc::EINTR {
            continue;
        }
        return Err(map_data_err("sendmsg"));
    }
}

pub fn unlink(path: &Path) -> Result<(), Fail> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Fail::Invalid { details: "path contains NUL" })?;
    if unsafe { libc::unlink(cpath.as_ptr()) } < 0 {
        return Err(Fail::last_os("unlink"));
    }
    Ok(())
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
))]
fn parse_packet_info(msg: &libc::msghdr) -> Option<PacketInfo> {
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == IPV4_PKTINFO {
                let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                let octets = info.ipi_addr.s_addr.to_ne_bytes();
                return Some(PacketInfo {
                    local_addr: IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3])),
                    interface: info.ipi_ifindex as u32,
                });
            }
            if hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == IPV6_PKTINFO {
                let info = &*(libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo);
                return Some(PacketInfo {
                    local_addr: IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)),
                    interface: info.ipi6_ifindex as u32,
                });
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    None
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn parse_packet_info(_msg: &libc::msghdr) -> Option<PacketInfo> {
    None
}
