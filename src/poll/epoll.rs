// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::ReadyEvent;
use crate::fail::Fail;
use crate::socket::shim;

use std::{cell::RefCell, collections::HashSet, os::unix::io::RawFd, time::Duration};

//==============================================================================
// Constants & Structures
//==============================================================================

const EVENT_BATCH: usize = 64;

/// Edge-triggered, one-shot epoll poller. Each fd is added once; every
/// suspend re-arms it with `EPOLL_CTL_MOD` carrying the union of the fd's
/// current interests.
pub struct EpollPoller {
    epfd: RawFd,
    registered: RefCell<HashSet<RawFd>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [EpollPoller].
impl EpollPoller {
    pub fn new() -> Result<Self, Fail> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Fail::last_os("epoll_create1"));
        }
        Ok(Self { epfd, registered: RefCell::new(HashSet::new()) })
    }

    pub fn arm(&self, fd: RawFd, readable: bool, writable: bool) -> Result<(), Fail> {
        let mut events = libc::EPOLLET | libc::EPOLLONESHOT;
        if readable {
            events |= libc::EPOLLIN | libc::EPOLLRDHUP;
        }
        if writable {
            events |= libc::EPOLLOUT;
        }
        let mut ev = libc::epoll_event { events: events as u32, u64: fd as u64 };

        let known = self.registered.borrow().contains(&fd);
        let op = if known { libc::EPOLL_CTL_MOD } else { libc::EPOLL_CTL_ADD };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc == 0 {
            self.registered.borrow_mut().insert(fd);
            return Ok(());
        }
        // The fd set can drift if a descriptor number is recycled by the
        // kernel between close and re-register; fall back to the other op.
        let fallback = match shim::errno() {
            e if e == libc::ENOENT => libc::EPOLL_CTL_ADD,
            e if e == libc::EEXIST => libc::EPOLL_CTL_MOD,
            errno => return Err(Fail::Syscall { errno, ctx: "epoll_ctl" }),
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, fallback, fd, &mut ev) };
        if rc < 0 {
            return Err(Fail::last_os("epoll_ctl"));
        }
        self.registered.borrow_mut().insert(fd);
        Ok(())
    }

    pub fn disarm(&self, fd: RawFd) {
        if self.registered.borrow_mut().remove(&fd) {
            unsafe {
                libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
        }
    }

    pub fn wait(&self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> Result<(), Fail> {
        let mut events: [libc::epoll_event; EVENT_BATCH] =
            unsafe { std::mem::zeroed() };
        let ms: libc::c_int = match timeout {
            Some(t) => t.as_millis().min(i32::max_value() as u128) as libc::c_int,
            None => -1,
        };
        let rc = unsafe { libc::epoll_wait(self.epfd, events.as_mut_ptr(), EVENT_BATCH as libc::c_int, ms) };
        if rc < 0 {
            if shim::errno() == libc::EINTR {
                return Ok(());
            }
            return Err(Fail::last_os("epoll_wait"));
        }
        for ev in events.iter().take(rc as usize) {
            let flags = ev.events as libc::c_int;
            let hangup = flags & (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR) != 0;
            out.push(ReadyEvent {
                fd: ev.u64 as RawFd,
                readable: flags & libc::EPOLLIN != 0 || hangup,
                writable: flags & libc::EPOLLOUT != 0 || hangup,
                error: None,
            });
        }
        Ok(())
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Drop trait implementation for [EpollPoller].
impl Drop for EpollPoller {
    fn drop(&mut self) {
        let _ = shim::close(self.epfd);
    }
}
