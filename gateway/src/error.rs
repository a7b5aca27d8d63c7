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

//! Error types for the node server

use std::net::SocketAddr;

/// Errors returned by the server control surface
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Unable to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised when admitting a session to the registry
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("All {0} nodes are busy")]
    Capacity(usize),

    #[error("Session {0} is already registered")]
    Duplicate(nodelink_common::SessionId),
}

/// Errors raised by a session handler
///
/// Any of these ends the session that raised it and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handler panicked")]
    Panicked,
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
