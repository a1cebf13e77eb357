// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::fail::Fail;

use slab::Slab;

use std::{collections::HashMap, os::unix::io::RawFd, task::Waker};

//==============================================================================
// Constants & Structures
//==============================================================================

/// The two kernel events a task may suspend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Readable,
    Writable,
}

/// One parked task. The slot outlives its (fd, event) index entry: completion
/// detaches the slot from the index and parks the result here until the
/// suspended future collects it (or is dropped).
struct WaiterSlot {
    fd: RawFd,
    event: Event,
    waker: Option<Waker>,
    result: Option<Result<(), Fail>>,
}

#[derive(Default)]
struct FdEntry {
    read: Option<usize>,
    write: Option<usize>,
}

/// Registration table: at most one waiter per (fd, event) pair.
pub struct WaiterTable {
    slots: Slab<WaiterSlot>,
    by_fd: HashMap<RawFd, FdEntry>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [WaiterTable].
impl WaiterTable {
    pub fn new() -> Self {
        Self { slots: Slab::new(), by_fd: HashMap::new() }
    }

    /// Registers a waiter for (fd, event) and returns its token.
    pub fn register(&mut self, fd: RawFd, event: Event, waker: Waker) -> Result<usize, Fail> {
        let entry = self.by_fd.entry(fd).or_insert_with(FdEntry::default);
        let cell = match event {
            Event::Readable => &mut entry.read,
            Event::Writable => &mut entry.write,
        };
        if cell.is_some() {
            return Err(Fail::Invalid { details: "waiter already registered for event" });
        }
        let token = self.slots.insert(WaiterSlot { fd, event, waker: Some(waker), result: None });
        *cell = Some(token);
        Ok(token)
    }

    /// Re-parks the waker of a still-pending waiter.
    pub fn set_waker(&mut self, token: usize, waker: &Waker) {
        if let Some(slot) = self.slots.get_mut(token) {
            slot.waker = Some(waker.clone());
        }
    }

    /// Collects the result of a completed waiter, releasing its slot.
    pub fn take_result(&mut self, token: usize) -> Option<Result<(), Fail>> {
        let done = match self.slots.get(token) {
            Some(slot) => slot.result.is_some(),
            None => false,
        };
        if !done {
            return None;
        }
        let slot = self.slots.remove(token);
        slot.result
    }

    /// Abandons a waiter, whether pending or completed-but-uncollected.
    pub fn deregister(&mut self, token: usize) {
        if !self.slots.contains(token) {
            return;
        }
        let slot = self.slots.remove(token);
        self.unlink(slot.fd, slot.event);
    }

    /// Completes the waiter parked on (fd, event), if any, detaching it from
    /// the index. Returns the waker to invoke once borrows are released.
    pub fn complete(&mut self, fd: RawFd, event: Event, result: Result<(), Fail>) -> Option<Waker> {
        let token = {
            let entry = self.by_fd.get_mut(&fd)?;
            match event {
                Event::Readable => entry.read.take(),
                Event::Writable => entry.write.take(),
            }
        }?;
        self.gc_fd(fd);
        let slot = self.slots.get_mut(token)?;
        slot.result = Some(result);
        slot.waker.take()
    }

    /// Completes every waiter parked on `fd`.
    pub fn complete_fd(&mut self, fd: RawFd, result: Result<(), Fail>, wakers: &mut Vec<Waker>) {
        for event in [Event::Readable, Event::Writable].iter() {
            if let Some(waker) = self.complete(fd, *event, result.clone()) {
                wakers.push(waker);
            }
        }
    }

    /// Completes every waiter in the table.
    pub fn complete_all(&mut self, result: Result<(), Fail>, wakers: &mut Vec<Waker>) {
        let fds: Vec<RawFd> = self.by_fd.keys().cloned().collect();
        for fd in fds {
            self.complete_fd(fd, result.clone(), wakers);
        }
    }

    /// Returns the (readable, writable) interest pair currently armed for `fd`.
    pub fn interests(&self, fd: RawFd) -> (bool, bool) {
        match self.by_fd.get(&fd) {
            Some(entry) => (entry.read.is_some(), entry.write.is_some()),
            None => (false, false),
        }
    }

    /// Snapshot of every fd with a pending interest, for the poll(2) backend.
    pub fn snapshot(&self) -> Vec<(RawFd, bool, bool)> {
        self.by_fd
            .iter()
            .filter(|(_, e)| e.read.is_some() || e.write.is_some())
            .map(|(fd, e)| (*fd, e.read.is_some(), e.write.is_some()))
            .collect()
    }

    fn unlink(&mut self, fd: RawFd, event: Event) {
        if let Some(entry) = self.by_fd.get_mut(&fd) {
            match event {
                Event::Readable => entry.read = None,
                Event::Writable => entry.write = None,
            }
        }
        self.gc_fd(fd);
    }

    fn gc_fd(&mut self, fd: RawFd) {
        if let Some(entry) = self.by_fd.get(&fd) {
            if entry.read.is_none() && entry.write.is_none() {
                self.by_fd.remove(&fd);
            }
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
