// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::ReadyEvent;
use crate::fail::Fail;
use crate::socket::shim;

use std::{os::unix::io::RawFd, time::Duration};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Portable poll(2) fallback. Stateless between cycles: the caller hands it a
/// snapshot of the waiter set and it rebuilds the pollfd array each time.
/// O(N) per cycle is the price of portability.
pub struct PollPoller;

/// Default tick when nothing bounds the wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [PollPoller].
impl PollPoller {
    pub fn new() -> Result<Self, Fail> {
        Ok(Self)
    }

    pub fn wait(
        &self,
        interests: &[(RawFd, bool, bool)],
        timeout: Option<Duration>,
        out: &mut Vec<ReadyEvent>,
    ) -> Result<(), Fail> {
        let mut pollfds: Vec<libc::pollfd> = interests
            .iter()
            .map(|(fd, readable, writable)| {
                let mut events: libc::c_short = 0;
                if *readable {
                    events |= libc::POLLIN;
                }
                if *writable {
                    events |= libc::POLLOUT;
                }
                libc::pollfd { fd: *fd, events, revents: 0 }
            })
            .collect();

        let ms = timeout
            .unwrap_or(DEFAULT_TIMEOUT)
            .as_millis()
            .min(i32::max_value() as u128) as libc::c_int;
        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, ms) };
        if rc < 0 {
            if shim::errno() == libc::EINTR {
                return Ok(());
            }
            return Err(Fail::last_os("poll"));
        }
        for pfd in pollfds.iter() {
            if pfd.revents == 0 {
                continue;
            }
            if pfd.revents & libc::POLLNVAL != 0 {
                out.push(ReadyEvent {
                    fd: pfd.fd,
                    readable: true,
                    writable: true,
                    error: Some(Fail::Syscall { errno: libc::EBADF, ctx: "poll" }),
                });
                continue;
            }
            let hangup = pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0;
            out.push(ReadyEvent {
                fd: pfd.fd,
                readable: pfd.revents & libc::POLLIN != 0 || hangup,
                writable: pfd.revents & libc::POLLOUT != 0 || hangup,
                error: None,
            });
        }
        Ok(())
    }
}
