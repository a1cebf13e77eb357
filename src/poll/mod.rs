// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! # Polling Socket Pool
//!
//! The pool multiplexes non-blocking descriptors over the best kernel
//! primitive available (epoll on Linux, kqueue on the BSDs, poll(2)
//! elsewhere). A task that hits `EWOULDBLOCK` suspends through
//! [SocketPool::suspend] and is resumed when the kernel reports readiness,
//! when its descriptor is torn down, or when the pool itself shuts down. The
//! pool also keeps the deadline queue that backs `sleep` and timeouts, so a
//! single kernel wait bounds both I/O and timers.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
mod pollset;
mod timer;
mod waiters;

pub use waiters::Event;

use crate::fail::Fail;
use timer::TimerQueue;
use waiters::WaiterTable;

use std::{
    cell::RefCell,
    future::Future,
    os::unix::io::RawFd,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

//==============================================================================
// Constants & Structures
//==============================================================================

/// A readiness report from a backend.
pub(crate) struct ReadyEvent {
    pub(crate) fd: RawFd,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: Option<Fail>,
}

enum Backend {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Epoll(epoll::EpollPoller),
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    Kqueue(kqueue::KqueuePoller),
    Poll(pollset::PollPoller),
}

struct PoolInner {
    waiters: WaiterTable,
    timers: TimerQueue,
    closed: bool,
}

/// The polling socket pool.
pub struct SocketPool {
    backend: Backend,
    inner: RefCell<PoolInner>,
}

/// A task parked until (fd, event) readiness. Dropping the future releases
/// its registration, which is how cooperative cancellation reaches the pool.
pub struct SuspendFuture {
    pool: Rc<SocketPool>,
    fd: RawFd,
    event: Event,
    token: Option<usize>,
}

/// A task parked until a deadline.
pub struct SleepFuture {
    pool: Rc<SocketPool>,
    deadline: Instant,
    token: Option<u64>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Backend].
impl Backend {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn best() -> Result<Self, Fail> {
        Ok(Backend::Epoll(epoll::EpollPoller::new()?))
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    fn best() -> Result<Self, Fail> {
        Ok(Backend::Kqueue(kqueue::KqueuePoller::new()?))
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )))]
    fn best() -> Result<Self, Fail> {
        Ok(Backend::Poll(pollset::PollPoller::new()?))
    }

    fn arm(&self, fd: RawFd, readable: bool, writable: bool) -> Result<(), Fail> {
        match self {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(p) => p.arm(fd, readable, writable),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(p) => p.arm(fd, readable, writable),
            Backend::Poll(_) => Ok(()),
        }
    }

    fn disarm(&self, fd: RawFd) {
        match self {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(p) => p.disarm(fd),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(p) => p.disarm(fd),
            Backend::Poll(_) => (),
        }
    }

    fn wait(
        &self,
        interests: &[(RawFd, bool, bool)],
        timeout: Option<Duration>,
        out: &mut Vec<ReadyEvent>,
    ) -> Result<(), Fail> {
        match self {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll(p) => p.wait(timeout, out),
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            Backend::Kqueue(p) => p.wait(timeout, out),
            Backend::Poll(p) => p.wait(interests, timeout, out),
        }
    }

    /// The poll(2) backend cannot block forever: its waiter set is a snapshot.
    fn needs_tick(&self) -> bool {
        match self {
            Backend::Poll(_) => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}

/// Associate functions for [SocketPool].
impl SocketPool {
    /// Creates a pool on the best backend the platform offers.
    pub fn new() -> Result<Rc<Self>, Fail> {
        Ok(Rc::new(Self {
            backend: Backend::best()?,
            inner: RefCell::new(PoolInner {
                waiters: WaiterTable::new(),
                timers: TimerQueue::new(),
                closed: false,
            }),
        }))
    }

    /// Creates a pool on the portable poll(2) backend.
    pub fn with_poll_backend() -> Result<Rc<Self>, Fail> {
        Ok(Rc::new(Self {
            backend: Backend::Poll(pollset::PollPoller::new()?),
            inner: RefCell::new(PoolInner {
                waiters: WaiterTable::new(),
                timers: TimerQueue::new(),
                closed: false,
            }),
        }))
    }

    /// Suspends the calling task until `fd` reports `event`.
    pub fn suspend(self: &Rc<Self>, fd: RawFd, event: Event) -> SuspendFuture {
        SuspendFuture { pool: self.clone(), fd, event, token: None }
    }

    /// Suspends the calling task until `deadline`. Always parks at least
    /// once, even for a deadline already in the past.
    pub fn sleep_until(self: &Rc<Self>, deadline: Instant) -> SleepFuture {
        SleepFuture { pool: self.clone(), deadline, token: None }
    }

    pub fn sleep(self: &Rc<Self>, duration: Duration) -> SleepFuture {
        let deadline = Instant::now()
            .checked_add(duration)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365));
        self.sleep_until(deadline)
    }

    /// Blocks in the kernel until readiness or the earliest deadline, then
    /// wakes every matched waiter and every expired timer.
    pub fn wait(&self) -> Result<(), Fail> {
        let (interests, timeout) = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(Fail::PoolClosed {});
            }
            let now = Instant::now();
            let timer_bound = inner
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now));
            let timeout = match timer_bound {
                Some(bound) => Some(bound),
                None if self.backend.needs_tick() => Some(pollset::DEFAULT_TIMEOUT),
                None => None,
            };
            (inner.waiters.snapshot(), timeout)
        };

        let mut events = Vec::new();
        self.backend.wait(&interests, timeout, &mut events)?;

        let mut wakers = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            for ev in events.iter() {
                match &ev.error {
                    Some(e) => inner.waiters.complete_fd(ev.fd, Err(e.clone()), &mut wakers),
                    None => {
                        if ev.readable {
                            if let Some(w) = inner.waiters.complete(ev.fd, Event::Readable, Ok(())) {
                                wakers.push(w);
                            }
                        }
                        if ev.writable {
                            if let Some(w) = inner.waiters.complete(ev.fd, Event::Writable, Ok(())) {
                                wakers.push(w);
                            }
                        }
                    }
                }
            }
            inner.timers.fire_expired(Instant::now(), &mut wakers);

            // One-shot dispatch may have disarmed an fd that still has the
            // other event's waiter parked; re-arm the survivors.
            for ev in events.iter() {
                let (readable, writable) = inner.waiters.interests(ev.fd);
                if readable || writable {
                    if let Err(e) = self.backend.arm(ev.fd, readable, writable) {
                        inner.waiters.complete_fd(ev.fd, Err(e), &mut wakers);
                    }
                }
            }
        }
        // Wake strictly after the borrow drops: a woken task may suspend
        // again re-entrantly.
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    /// Drops every registration for `fd` and wakes its waiters as
    /// disconnected. Called when a socket is torn down under a suspension.
    pub fn deregister_fd(&self, fd: RawFd) {
        let mut wakers = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            inner.waiters.complete_fd(fd, Err(Fail::Disconnected {}), &mut wakers);
        }
        self.backend.disarm(fd);
        for waker in wakers {
            waker.wake();
        }
    }

    /// Closes the pool: every pending waiter completes with
    /// [Fail::PoolClosed] and every timer fires.
    pub fn shutdown(&self) {
        let mut wakers = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.waiters.complete_all(Err(Fail::PoolClosed {}), &mut wakers);
            inner.timers.fire_all(&mut wakers);
        }
        for waker in wakers {
            waker.wake();
        }
    }

    fn register(&self, fd: RawFd, event: Event, waker: std::task::Waker) -> Result<usize, Fail> {
        let (token, readable, writable) = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(Fail::PoolClosed {});
            }
            let token = inner.waiters.register(fd, event, waker)?;
            let (readable, writable) = inner.waiters.interests(fd);
            (token, readable, writable)
        };
        if let Err(e) = self.backend.arm(fd, readable, writable) {
            self.inner.borrow_mut().waiters.deregister(token);
            return Err(e);
        }
        Ok(token)
    }

    fn check(&self, token: usize, waker: &std::task::Waker) -> Option<Result<(), Fail>> {
        let mut inner = self.inner.borrow_mut();
        match inner.waiters.take_result(token) {
            Some(result) => Some(result),
            None => {
                inner.waiters.set_waker(token, waker);
                None
            }
        }
    }

    fn forget(&self, token: usize) {
        self.inner.borrow_mut().waiters.deregister(token);
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Future trait implementation for [SuspendFuture].
impl Future for SuspendFuture {
    type Output = Result<(), Fail>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let self_ = self.get_mut();
        match self_.token {
            None => match self_.pool.register(self_.fd, self_.event, ctx.waker().clone()) {
                Ok(token) => {
                    trace!("suspend fd={} event={:?}", self_.fd, self_.event);
                    self_.token = Some(token);
                    Poll::Pending
                }
                Err(e) => Poll::Ready(Err(e)),
            },
            Some(token) => match self_.pool.check(token, ctx.waker()) {
                Some(result) => {
                    trace!("resume fd={} event={:?}", self_.fd, self_.event);
                    self_.token = None;
                    Poll::Ready(result)
                }
                None => Poll::Pending,
            },
        }
    }
}

/// Drop trait implementation for [SuspendFuture].
impl Drop for SuspendFuture {
    fn drop(&mut self) {
        if let Some(token) = self.token {
            self.pool.forget(token);
        }
    }
}

/// Future trait implementation for [SleepFuture].
impl Future for SleepFuture {
    type Output = Result<(), Fail>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let self_ = self.get_mut();
        let mut inner = self_.pool.inner.borrow_mut();
        if inner.closed {
            self_.token = None;
            return Poll::Ready(Err(Fail::PoolClosed {}));
        }
        match self_.token {
            None => {
                let token = inner.timers.register(self_.deadline, ctx.waker().clone());
                self_.token = Some(token);
                Poll::Pending
            }
            Some(token) => {
                if inner.timers.consume_fired(token) {
                    self_.token = None;
                    Poll::Ready(Ok(()))
                } else {
                    inner.timers.set_waker(token, ctx.waker());
                    Poll::Pending
                }
            }
        }
    }
}

/// Drop trait implementation for [SleepFuture].
impl Drop for SleepFuture {
    fn drop(&mut self) {
        if let Some(token) = self.token {
            self.pool.inner.borrow_mut().timers.cancel(token);
        }
    }
}
