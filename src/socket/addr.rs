// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::fail::Fail;

use libc::{c_int, sa_family_t, sockaddr_storage, socklen_t};

use std::{
    fmt, mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
};

//==============================================================================
// Constants & Structures
//==============================================================================

/// A transport address in one of the three supported families.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketAddress {
    Inet4 { addr: Ipv4Addr, port: u16 },
    Inet6 { addr: Ipv6Addr, port: u16, scope: u32 },
    Unix { path: PathBuf },
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [SocketAddress].
impl SocketAddress {
    /// Creates an IPv4 or IPv6 address.
    pub fn inet(addr: IpAddr, port: u16) -> Self {
        match addr {
            IpAddr::V4(addr) => SocketAddress::Inet4 { addr, port },
            IpAddr::V6(addr) => SocketAddress::Inet6 { addr, port, scope: 0 },
        }
    }

    /// Creates a UNIX-domain address, enforcing the platform `sun_path` bound.
    pub fn unix<P: AsRef<Path>>(path: P) -> Result<Self, Fail> {
        use std::os::unix::ffi::OsStrExt;
        let path = path.as_ref();
        // One byte is reserved for the trailing NUL.
        if path.as_os_str().as_bytes().len() >= sun_path_capacity() {
            return Err(Fail::Invalid { details: "unix socket path too long" });
        }
        Ok(SocketAddress::Unix { path: path.to_path_buf() })
    }

    /// Returns the address family of the target address.
    pub fn family(&self) -> c_int {
        match self {
            SocketAddress::Inet4 { .. } => libc::AF_INET,
            SocketAddress::Inet6 { .. } => libc::AF_INET6,
            SocketAddress::Unix { .. } => libc::AF_UNIX,
        }
    }

    /// Returns the port of the target address, if it has one.
    pub fn port(&self) -> Option<u16> {
        match self {
            SocketAddress::Inet4 { port, .. } => Some(*port),
            SocketAddress::Inet6 { port, .. } => Some(*port),
            SocketAddress::Unix { .. } => None,
        }
    }

    /// Encodes the target address into a `sockaddr_storage`.
    pub(crate) fn encode(&self) -> Result<(sockaddr_storage, socklen_t), Fail> {
        let mut ss: sockaddr_storage = unsafe { mem::zeroed() };
        match self {
            SocketAddress::Inet4 { addr, port } => {
                let sin = unsafe { &mut *(&mut ss as *mut sockaddr_storage as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as sa_family_t;
                sin.sin_port = port.to_be();
                sin.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) };
                let len = mem::size_of::<libc::sockaddr_in>() as socklen_t;
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "netbsd",
                    target_os = "openbsd",
                    target_os = "dragonfly"
                ))]
                {
                    sin.sin_len = len as u8;
                }
                Ok((ss, len))
            }
            SocketAddress::Inet6 { addr, port, scope } => {
                let sin6 =
                    unsafe { &mut *(&mut ss as *mut sockaddr_storage as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as sa_family_t;
                sin6.sin6_port = port.to_be();
                sin6.sin6_addr.s6_addr = addr.octets();
                sin6.sin6_scope_id = *scope;
                let len = mem::size_of::<libc::sockaddr_in6>() as socklen_t;
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "netbsd",
                    target_os = "openbsd",
                    target_os = "dragonfly"
                ))]
                {
                    sin6.sin6_len = len as u8;
                }
                Ok((ss, len))
            }
            SocketAddress::Unix { path } => {
                use std::os::unix::ffi::OsStrExt;
                let bytes = path.as_os_str().as_bytes();
                if bytes.len() >= sun_path_capacity() {
                    return Err(Fail::Invalid { details: "unix socket path too long" });
                }
                let sun = unsafe { &mut *(&mut ss as *mut sockaddr_storage as *mut libc::sockaddr_un) };
                sun.sun_family = libc::AF_UNIX as sa_family_t;
                for (i, b) in bytes.iter().enumerate() {
                    sun.sun_path[i] = *b as libc::c_char;
                }
                let len = mem::size_of::<libc::sockaddr_un>() as socklen_t;
                Ok((ss, len))
            }
        }
    }

    /// Decodes a `sockaddr_storage` produced by the kernel.
    pub(crate) fn decode(ss: &sockaddr_storage, len: socklen_t) -> Result<Self, Fail> {
        match ss.ss_family as c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(ss as *const sockaddr_storage as *const libc::sockaddr_in) };
                let octets = sin.sin_addr.s_addr.to_ne_bytes();
                Ok(SocketAddress::Inet4 {
                    addr: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                    port: u16::from_be(sin.sin_port),
                })
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(ss as *const sockaddr_storage as *const libc::sockaddr_in6) };
                Ok(SocketAddress::Inet6 {
                    addr: Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    port: u16::from_be(sin6.sin6_port),
                    scope: sin6.sin6_scope_id,
                })
            }
            libc::AF_UNIX => {
                use std::ffi::OsStr;
                use std::os::unix::ffi::OsStrExt;
                let sun = unsafe { &*(ss as *const sockaddr_storage as *const libc::sockaddr_un) };
                let path_off = {
                    let base = sun as *const libc::sockaddr_un as usize;
                    let field = &sun.sun_path as *const _ as usize;
                    field - base
                };
                let avail = (len as usize).saturating_sub(path_off);
                let mut bytes: Vec<u8> = Vec::new();
                for c in sun.sun_path.iter().take(avail) {
                    if *c == 0 {
                        break;
                    }
                    bytes.push(*c as u8);
                }
                Ok(SocketAddress::Unix {
                    path: PathBuf::from(OsStr::from_bytes(&bytes)),
                })
            }
            _ => Err(Fail::UnsupportedAddress {}),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display trait implementation for [SocketAddress].
impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SocketAddress::Inet4 { addr, port } => write!(f, "{}:{}", addr, port),
            SocketAddress::Inet6 { addr, port, .. } => write!(f, "[{}]:{}", addr, port),
            SocketAddress::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Conversion from the standard library's socket addresses.
impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => SocketAddress::Inet4 { addr: *v4.ip(), port: v4.port() },
            SocketAddr::V6(v6) => SocketAddress::Inet6 {
                addr: *v6.ip(),
                port: v6.port(),
                scope: v6.scope_id(),
            },
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Capacity of the platform's `sun_path` field (104 on BSD, 108 on Linux).
fn sun_path_capacity() -> usize {
    let sun: libc::sockaddr_un = unsafe { mem::zeroed() };
    sun.sun_path.len()
}

//==============================================================================
// Unit Tests
//==============================================================================
