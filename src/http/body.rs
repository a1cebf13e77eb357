// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::decoder::{BodyFraming, ChunkDecoder, ChunkProgress};
use crate::{fail::Fail, socket::AsyncSocket};

use bytes::{Bytes, BytesMut};

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Default ceiling of the replay buffer.
pub const DEFAULT_REPLAY_SIZE: usize = 1 << 20;

enum FramingState {
    Fixed { remaining: u64 },
    Chunked(ChunkDecoder),
    Done,
}

enum BodySource {
    /// Live connection: leftover wire bytes shared with the connection's
    /// parse buffer, plus the socket for more.
    Wire { io: Rc<AsyncSocket>, wire: Rc<RefCell<BytesMut>>, read_size: usize },
    /// Fully materialized body (synthetic requests, tests).
    Buffered,
}

/// Bounded memory of already-yielded bytes, allowing one rewind per request.
struct ReplayBuffer {
    kept: VecDeque<Bytes>,
    total: usize,
    cap: usize,
    rewound: bool,
    overflowed: bool,
}

struct BodyInner {
    source: BodySource,
    framing: FramingState,
    replay: ReplayBuffer,
    pending: VecDeque<Bytes>,
}

/// Lazy request body. Cloning hands out another handle onto the same
/// underlying stream; the driver keeps one to enforce the drain discipline
/// after the handler returns.
#[derive(Clone)]
pub struct Body {
    inner: Rc<RefCell<BodyInner>>,
}

enum Step {
    Yield(Bytes),
    Eof,
    Read,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [ReplayBuffer].
impl ReplayBuffer {
    fn new(cap: usize) -> Self {
        Self { kept: VecDeque::new(), total: 0, cap, rewound: false, overflowed: false }
    }

    fn record(&mut self, bytes: &Bytes) {
        if self.overflowed || bytes.is_empty() {
            return;
        }
        if self.total + bytes.len() > self.cap {
            // Past the ceiling the record is useless for a rewind-to-start;
            // drop it all rather than keep a hole-riddled tail.
            self.overflowed = true;
            self.kept.clear();
            self.total = 0;
            return;
        }
        self.total += bytes.len();
        self.kept.push_back(bytes.clone());
    }
}

/// Associate functions for [Body].
impl Body {
    /// Creates a body backed by the connection's wire buffer and socket.
    pub(crate) fn wire(
        io: Rc<AsyncSocket>,
        wire: Rc<RefCell<BytesMut>>,
        framing: BodyFraming,
        read_size: usize,
        replay_cap: usize,
    ) -> Self {
        let framing = match framing {
            BodyFraming::None => FramingState::Done,
            BodyFraming::Fixed(0) => FramingState::Done,
            BodyFraming::Fixed(n) => FramingState::Fixed { remaining: n },
            BodyFraming::Chunked => FramingState::Chunked(ChunkDecoder::new()),
        };
        Self {
            inner: Rc::new(RefCell::new(BodyInner {
                source: BodySource::Wire { io, wire, read_size },
                framing,
                replay: ReplayBuffer::new(replay_cap),
                pending: VecDeque::new(),
            })),
        }
    }

    /// Creates a fully materialized body.
    pub fn from_bytes<B: Into<Bytes>>(bytes: B) -> Self {
        let bytes = bytes.into();
        let mut replay = ReplayBuffer::new(DEFAULT_REPLAY_SIZE);
        let mut pending = VecDeque::new();
        if !bytes.is_empty() {
            replay.record(&bytes);
            pending.push_back(bytes);
        }
        Self {
            inner: Rc::new(RefCell::new(BodyInner {
                source: BodySource::Buffered,
                framing: FramingState::Done,
                replay,
                pending,
            })),
        }
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Yields the next slice of body bytes, in wire order; `None` once the
    /// body is complete.
    pub async fn next_chunk(&self) -> Result<Option<Bytes>, Fail> {
        loop {
            match self.inner.borrow_mut().step()? {
                Step::Yield(bytes) => return Ok(Some(bytes)),
                Step::Eof => return Ok(None),
                Step::Read => (),
            }
            // Read outside the borrow: the wire read is a suspension point.
            let (io, read_size) = {
                let inner = self.inner.borrow();
                match &inner.source {
                    BodySource::Wire { io, read_size, .. } => (io.clone(), *read_size),
                    BodySource::Buffered => {
                        return Err(Fail::Invalid { details: "buffered body cannot read" });
                    }
                }
            };
            let mut chunk = BytesMut::with_capacity(read_size);
            chunk.resize(read_size, 0);
            let n = io.read(&mut chunk[..]).await?;
            if n == 0 {
                // The peer hung up in the middle of an advertised body.
                self.inner.borrow_mut().framing = FramingState::Done;
                return Err(Fail::Disconnected {});
            }
            let inner = self.inner.borrow();
            if let BodySource::Wire { wire, .. } = &inner.source {
                wire.borrow_mut().extend_from_slice(&chunk[..n]);
            }
        }
    }

    /// Concatenates the remaining body, failing once it exceeds `limit`.
    pub async fn read_all(&self, limit: usize) -> Result<Bytes, Fail> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            if out.len() + chunk.len() > limit {
                return Err(Fail::TooLarge { details: "request body" });
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Rewinds the body to its first byte. Allowed once, and only while the
    /// replay buffer still holds everything yielded so far.
    pub fn replay(&self) -> Result<(), Fail> {
        let mut inner = self.inner.borrow_mut();
        if inner.replay.rewound {
            return Err(Fail::Invalid { details: "body already replayed" });
        }
        if inner.replay.overflowed {
            return Err(Fail::TooLarge { details: "replay buffer exceeded" });
        }
        inner.replay.rewound = true;
        let kept: Vec<Bytes> = inner.replay.kept.iter().cloned().collect();
        // Anything already queued (unlikely) comes after the replayed prefix.
        for bytes in kept.into_iter().rev() {
            inner.pending.push_front(bytes);
        }
        Ok(())
    }

    /// Reads and discards whatever the consumer left behind.
    pub async fn drain(&self) -> Result<(), Fail> {
        while self.next_chunk().await?.is_some() {}
        Ok(())
    }

    /// Tells whether every body byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        let inner = self.inner.borrow();
        inner.pending.is_empty()
            && match inner.framing {
                FramingState::Done => true,
                _ => false,
            }
    }
}

/// Associate functions for [BodyInner].
impl BodyInner {
    fn step(&mut self) -> Result<Step, Fail> {
        if let Some(bytes) = self.pending.pop_front() {
            return Ok(Step::Yield(bytes));
        }
        let wire = match &self.source {
            BodySource::Wire { wire, .. } => wire.clone(),
            BodySource::Buffered => return Ok(Step::Eof),
        };
        let (step, next) = match &mut self.framing {
            FramingState::Done => (Step::Eof, None),
            FramingState::Fixed { remaining } => {
                let mut wire = wire.borrow_mut();
                if wire.is_empty() {
                    (Step::Read, None)
                } else {
                    let take = (*remaining).min(wire.len() as u64) as usize;
                    let bytes = wire.split_to(take).freeze();
                    *remaining -= take as u64;
                    let next = if *remaining == 0 { Some(FramingState::Done) } else { None };
                    self.replay.record(&bytes);
                    (Step::Yield(bytes), next)
                }
            }
            FramingState::Chunked(decoder) => {
                let mut wire = wire.borrow_mut();
                match decoder.decode(&mut wire)? {
                    ChunkProgress::Data(bytes) => {
                        self.replay.record(&bytes);
                        (Step::Yield(bytes), None)
                    }
                    ChunkProgress::NeedMore => (Step::Read, None),
                    ChunkProgress::Complete => (Step::Eof, Some(FramingState::Done)),
                }
            }
        };
        if let Some(state) = next {
            self.framing = state;
        }
        Ok(step)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
