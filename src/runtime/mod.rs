// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Single-threaded cooperative executor. Ready tasks run to their next
//! suspension point, then the executor blocks in the socket pool's kernel
//! wait until readiness or a deadline wakes somebody. Every network-touching
//! operation and every sleep is a suspension point; nothing else may block.

use crate::{
    fail::Fail,
    poll::{SleepFuture, SocketPool},
};

use futures::{
    executor::{LocalPool, LocalSpawner},
    future::{select, Either, FutureExt},
    pin_mut,
    task::{noop_waker, LocalSpawnExt},
};

use std::{
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};

//==============================================================================
// Constants & Structures
//==============================================================================

/// The executor: a local task pool married to a socket pool.
pub struct Executor {
    tasks: LocalPool,
    spawner: LocalSpawner,
    sockets: Rc<SocketPool>,
}

/// Cloneable handle onto the executor: spawn tasks, sleep, reach the socket
/// pool.
#[derive(Clone)]
pub struct Runtime {
    spawner: LocalSpawner,
    sockets: Rc<SocketPool>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Executor].
impl Executor {
    /// Creates an executor on the platform's best polling backend.
    pub fn new() -> Result<Self, Fail> {
        Ok(Self::with_sockets(SocketPool::new()?))
    }

    /// Creates an executor on the portable poll(2) backend.
    pub fn with_poll_backend() -> Result<Self, Fail> {
        Ok(Self::with_sockets(SocketPool::with_poll_backend()?))
    }

    fn with_sockets(sockets: Rc<SocketPool>) -> Self {
        let tasks = LocalPool::new();
        let spawner = tasks.spawner();
        Self { tasks, spawner, sockets }
    }

    pub fn runtime(&self) -> Runtime {
        Runtime { spawner: self.spawner.clone(), sockets: self.sockets.clone() }
    }

    /// Drives the executor until `future` completes. The loop alternates
    /// between running every ready task and blocking in the kernel.
    pub fn block_on<F>(&mut self, future: F) -> Result<F::Output, Fail>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (remote, handle) = future.remote_handle();
        self.spawner.spawn_local(remote).map_err(|_| Fail::PoolClosed {})?;

        let waker = noop_waker();
        let mut ctx = Context::from_waker(&waker);
        let mut handle = handle;
        loop {
            self.tasks.run_until_stalled();
            if let Poll::Ready(output) = Pin::new(&mut handle).poll(&mut ctx) {
                return Ok(output);
            }
            self.sockets.wait()?;
        }
    }
}

/// Associate functions for [Runtime].
impl Runtime {
    /// Spawns a detached task onto the executor.
    pub fn spawn<F>(&self, future: F) -> Result<(), Fail>
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawner.spawn_local(future).map_err(|_| Fail::PoolClosed {})
    }

    pub fn sockets(&self) -> &Rc<SocketPool> {
        &self.sockets
    }

    /// Parks the calling task for `duration`. Zero still parks once.
    pub fn sleep(&self, duration: Duration) -> SleepFuture {
        self.sockets.sleep(duration)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Drop trait implementation for [Executor]. Outstanding waiters complete
/// with [Fail::PoolClosed] before the task pool tears down.
impl Drop for Executor {
    fn drop(&mut self) {
        self.sockets.shutdown();
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Races `future` against a deadline. If the deadline wins, the operation is
/// dropped (releasing any pool registration it holds) and [Fail::Timeout] is
/// returned. A zero duration still polls the operation once before firing.
pub async fn with_timeout<F: Future>(
    rt: &Runtime,
    duration: Duration,
    future: F,
) -> Result<F::Output, Fail> {
    let sleep = rt.sleep(duration);
    pin_mut!(future);
    pin_mut!(sleep);
    match select(future, sleep).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right((Ok(()), _)) => Err(Fail::Timeout {}),
        Either::Right((Err(e), _)) => Err(e),
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
