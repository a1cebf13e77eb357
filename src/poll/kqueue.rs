// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::ReadyEvent;
use crate::fail::Fail;
use crate::socket::shim;

use std::{mem, os::unix::io::RawFd, ptr, time::Duration};

//==============================================================================
// Constants & Structures
//==============================================================================

const EVENT_BATCH: usize = 64;

/// One-shot kqueue poller. Every suspend registers an `EV_ADD|EV_ONESHOT`
/// kevent for the requested filter; the kernel drops the registration when it
/// fires, which matches the one-wakeup-per-suspend contract exactly.
pub struct KqueuePoller {
    kq: RawFd,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [KqueuePoller].
impl KqueuePoller {
    pub fn new() -> Result<Self, Fail> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(Fail::last_os("kqueue"));
        }
        Ok(Self { kq })
    }

    fn change(&self, fd: RawFd, filter: i32, flags: u32) -> Result<(), Fail> {
        let kev = libc::kevent {
            ident: fd as _,
            filter: filter as _,
            flags: flags as _,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        let rc = unsafe { libc::kevent(self.kq, &kev, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            return Err(Fail::last_os("kevent(change)"));
        }
        Ok(())
    }

    pub fn arm(&self, fd: RawFd, readable: bool, writable: bool) -> Result<(), Fail> {
        let flags = (libc::EV_ADD | libc::EV_ONESHOT) as u32;
        if readable {
            self.change(fd, libc::EVFILT_READ as i32, flags)?;
        }
        if writable {
            self.change(fd, libc::EVFILT_WRITE as i32, flags)?;
        }
        Ok(())
    }

    pub fn disarm(&self, fd: RawFd) {
        // One-shot filters may already be gone; ENOENT is expected here.
        let _ = self.change(fd, libc::EVFILT_READ as i32, libc::EV_DELETE as u32);
        let _ = self.change(fd, libc::EVFILT_WRITE as i32, libc::EV_DELETE as u32);
    }

    pub fn wait(&self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> Result<(), Fail> {
        let mut events: [libc::kevent; EVENT_BATCH] = unsafe { mem::zeroed() };
        let ts;
        let ts_ptr = match timeout {
            Some(t) => {
                ts = libc::timespec {
                    tv_sec: t.as_secs() as _,
                    tv_nsec: t.subsec_nanos() as _,
                };
                &ts as *const libc::timespec
            }
            None => ptr::null(),
        };
        let rc = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                events.as_mut_ptr(),
                EVENT_BATCH as libc::c_int,
                ts_ptr,
            )
        };
        if rc < 0 {
            if shim::errno() == libc::EINTR {
                return Ok(());
            }
            return Err(Fail::last_os("kevent(wait)"));
        }
        for ev in events.iter().take(rc as usize) {
            let fd = ev.ident as RawFd;
            if (ev.flags as u32) & (libc::EV_ERROR as u32) != 0 {
                out.push(ReadyEvent {
                    fd,
                    readable: true,
                    writable: true,
                    error: Some(Fail::Syscall { errno: ev.data as i32, ctx: "kevent" }),
                });
                continue;
            }
            let eof = (ev.flags as u32) & (libc::EV_EOF as u32) != 0;
            match ev.filter as i32 {
                f if f == libc::EVFILT_READ as i32 => {
                    // EOF on the read side unblocks writers too: any write
                    // would hit the closed peer immediately.
                    out.push(ReadyEvent { fd, readable: true, writable: eof, error: None });
                }
                f if f == libc::EVFILT_WRITE as i32 => {
                    out.push(ReadyEvent { fd, readable: false, writable: true, error: None });
                }
                _ => (),
            }
        }
        Ok(())
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Drop trait implementation for [KqueuePoller].
impl Drop for KqueuePoller {
    fn drop(&mut self) {
        let _ = shim::close(self.kq);
    }
}
