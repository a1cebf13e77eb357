// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use custom_error::custom_error;

//==============================================================================
// Constants & Structures
//==============================================================================

custom_error! { #[derive(Clone, PartialEq, Eq)] pub Fail
    Syscall{ errno: i32, ctx: &'static str } = "{ctx} failed (errno {errno})",
    Disconnected{} = "peer disconnected",
    UnsupportedAddress{} = "unsupported socket address",
    WouldBlock{} = "operation would block",
    PoolClosed{} = "socket pool closed",
    Malformed{ details: &'static str } = "malformed message: {details}",
    TooLarge{ details: &'static str } = "request too large: {details}",
    Timeout{} = "operation timed out",
    Cancelled{} = "operation cancelled",
    Unhandled{} = "no route matched",
    Invalid{ details: &'static str } = "invalid argument: {details}",
    AlreadyStarted{} = "server already started",
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Fail].
impl Fail {
    /// Creates a syscall failure from the calling thread's last OS error.
    pub fn last_os(ctx: &'static str) -> Fail {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Fail::Syscall { errno, ctx }
    }

    /// Returns the errno carried by the target failure, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Fail::Syscall { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Tells whether the target failure is a transient accept error, i.e. one
    /// that the accept loop logs and survives.
    pub fn transient_accept(&self) -> bool {
        match self.errno() {
            Some(errno) => {
                errno == libc::EMFILE
                    || errno == libc::ENFILE
                    || errno == libc::ECONNABORTED
                    || errno == libc::ENOBUFS
                    || errno == libc::ENOMEM
            }
            None => *self == Fail::WouldBlock {},
        }
    }
}
