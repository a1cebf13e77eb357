// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    task::Waker,
    time::Instant,
};

//==============================================================================
// Constants & Structures
//==============================================================================

struct TimerSlot {
    waker: Option<Waker>,
    fired: bool,
}

/// Monotonic deadline queue. Tokens are never reused, so cancelled entries can
/// be skipped lazily when they surface at the top of the heap.
pub struct TimerQueue {
    slots: HashMap<u64, TimerSlot>,
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    next_token: u64,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [TimerQueue].
impl TimerQueue {
    pub fn new() -> Self {
        Self { slots: HashMap::new(), heap: BinaryHeap::new(), next_token: 0 }
    }

    /// Registers a deadline and returns its token.
    pub fn register(&mut self, deadline: Instant, waker: Waker) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.slots.insert(token, TimerSlot { waker: Some(waker), fired: false });
        self.heap.push(Reverse((deadline, token)));
        token
    }

    pub fn set_waker(&mut self, token: u64, waker: &Waker) {
        if let Some(slot) = self.slots.get_mut(&token) {
            if !slot.fired {
                slot.waker = Some(waker.clone());
            }
        }
    }

    /// Tells whether the timer fired; a fired timer is released by this query.
    pub fn consume_fired(&mut self, token: u64) -> bool {
        let fired = self.slots.get(&token).map(|s| s.fired).unwrap_or(false);
        if fired {
            self.slots.remove(&token);
        }
        fired
    }

    pub fn cancel(&mut self, token: u64) {
        self.slots.remove(&token);
    }

    /// Earliest live deadline, pruning cancelled entries from the top.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        loop {
            let Reverse((deadline, token)) = *self.heap.peek()?;
            match self.slots.get(&token) {
                Some(slot) if !slot.fired => return Some(deadline),
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    /// Fires every deadline at or before `now`.
    pub fn fire_expired(&mut self, now: Instant, wakers: &mut Vec<Waker>) {
        loop {
            match self.heap.peek() {
                Some(Reverse((deadline, _))) if *deadline <= now => (),
                _ => return,
            }
            let token = match self.heap.pop() {
                Some(Reverse((_, token))) => token,
                None => return,
            };
            if let Some(slot) = self.slots.get_mut(&token) {
                slot.fired = true;
                if let Some(waker) = slot.waker.take() {
                    wakers.push(waker);
                }
            }
        }
    }

    /// Fires everything immediately (pool shutdown).
    pub fn fire_all(&mut self, wakers: &mut Vec<Waker>) {
        for slot in self.slots.values_mut() {
            slot.fired = true;
            if let Some(waker) = slot.waker.take() {
                wakers.push(waker);
            }
        }
        self.heap.clear();
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
