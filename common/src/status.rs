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

//! Status events and server lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a status event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLevel::Info => f.pad("INFO"),
            StatusLevel::Warning => f.pad("WARN"),
            StatusLevel::Error => f.pad("ERROR"),
        }
    }
}

/// Human-readable notification about a lifecycle or error occurrence
///
/// The message text is the contract; it is meant for people, not parsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub message: String,
    pub level: StatusLevel,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Create an event stamped with the current time
    pub fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, message)
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Server lifecycle state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    /// Check if the server is accepting connections
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Running)
    }

    /// Check if the server is between the two stable states
    pub fn is_transitioning(&self) -> bool {
        matches!(self, ServerState::Starting | ServerState::Stopping)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopping => write!(f, "stopping"),
        }
    }
}
