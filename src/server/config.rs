// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    http::{body, decoder},
    socket::SocketAddress,
};

use std::time::Duration;

//==============================================================================
// Constants & Structures
//==============================================================================

/// Default per-request handler deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default listen backlog.
pub const DEFAULT_BACKLOG: usize = 128;

/// Server configuration. The event pool arrives through the [Runtime]
/// handle and the log sink is the `log` facade, so neither lives here.
///
/// [Runtime]: crate::runtime::Runtime
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Where to bind.
    pub address: SocketAddress,
    /// Per-request deadline: both for completing a request head once bytes
    /// start arriving and for the handler producing its response.
    pub timeout: Duration,
    /// Listen backlog.
    pub backlog: usize,
    /// Ceiling of the per-connection shared parse buffer.
    pub shared_request_buffer_size: usize,
    /// Ceiling of the per-request body replay buffer.
    pub shared_request_replay_size: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [ServerConfig].
impl ServerConfig {
    pub fn new(address: SocketAddress) -> Self {
        Self {
            address,
            timeout: DEFAULT_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
            shared_request_buffer_size: decoder::DEFAULT_BUFFER_SIZE,
            shared_request_replay_size: body::DEFAULT_REPLAY_SIZE,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn request_buffer_size(mut self, bytes: usize) -> Self {
        self.shared_request_buffer_size = bytes;
        self
    }

    pub fn request_replay_size(mut self, bytes: usize) -> Self {
        self.shared_request_replay_size = bytes;
        self
    }
}
