//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Session data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Session identifier, assigned monotonically by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node slot occupied by a live session, starting at 1
pub type NodeNumber = u16;

/// Read-only view of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier
    pub id: SessionId,

    /// Node the caller occupies
    pub node: NodeNumber,

    /// Remote peer address
    pub remote_addr: SocketAddr,

    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Seconds elapsed since the connection was accepted
    pub fn connected_for(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds()
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} session {} from {} since {}",
            self.node,
            self.id,
            self.remote_addr,
            self.connected_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The peer closed its end of the connection
    PeerClosed,

    /// No inbound data within the idle timeout
    IdleTimeout,

    /// The server asked the session to terminate
    Shutdown,

    /// The session handler asked to hang up
    HungUp,

    /// The session outlived the shutdown grace period and was closed by force
    Forced,

    /// Socket read or write failed
    Io(String),

    /// The session handler failed
    Handler(String),
}

impl CloseReason {
    /// Whether the session ended because something went wrong
    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Io(_) | CloseReason::Handler(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
            CloseReason::HungUp => write!(f, "hung up"),
            CloseReason::Forced => write!(f, "forcibly closed"),
            CloseReason::Io(reason) => write!(f, "i/o error: {}", reason),
            CloseReason::Handler(reason) => write!(f, "handler error: {}", reason),
        }
    }
}
