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

//! Session handlers
//!
//! The node server does not know what callers are doing once connected. Each
//! accepted connection gets its own [`SessionHandler`] from a
//! [`HandlerFactory`]; the handler sees the caller's bytes in the order they
//! arrived and answers with bytes to send back.

use crate::error::HandlerError;
use async_trait::async_trait;
use nodelink_common::{CloseReason, SessionInfo};

/// End-of-transmission, hangs up the built-in echo handler
const EOT: u8 = 0x04;

/// What a handler wants done after seeing input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Bytes to write to the caller, in order
    pub output: Vec<u8>,

    /// Close the session once `output` has been written
    pub hangup: bool,
}

impl Reply {
    /// Nothing to send, keep the session open
    pub fn none() -> Self {
        Self::default()
    }

    pub fn data(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            hangup: false,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::data(text.as_bytes())
    }

    /// Close the session after this reply
    pub fn and_hangup(mut self) -> Self {
        self.hangup = true;
        self
    }
}

/// Application protocol running over one accepted connection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionHandler: Send {
    /// Called once before any input is read
    async fn on_connect(&mut self, _session: &SessionInfo) -> Result<Reply, HandlerError> {
        Ok(Reply::none())
    }

    /// Called with each chunk of bytes read from the caller
    async fn on_data(&mut self, data: &[u8]) -> Result<Reply, HandlerError>;

    /// Called once when the session ends, whatever the reason
    async fn on_close(&mut self, _reason: &CloseReason) {}
}

/// Creates one handler per accepted connection
pub trait HandlerFactory: Send + Sync {
    fn create(&self, session: &SessionInfo) -> Box<dyn SessionHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&SessionInfo) -> Box<dyn SessionHandler> + Send + Sync,
{
    fn create(&self, session: &SessionInfo) -> Box<dyn SessionHandler> {
        self(session)
    }
}

/// Greets the caller and echoes back everything it sends
///
/// An EOT byte (Ctrl-D) hangs up after echoing what preceded it.
#[derive(Debug, Default)]
pub struct EchoHandler {
    banner: Option<String>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `banner` on connect; `{node}` is replaced by the caller's node
    pub fn with_banner(banner: impl Into<String>) -> Self {
        Self {
            banner: Some(banner.into()),
        }
    }
}

#[async_trait]
impl SessionHandler for EchoHandler {
    async fn on_connect(&mut self, session: &SessionInfo) -> Result<Reply, HandlerError> {
        Ok(match &self.banner {
            Some(banner) => Reply::text(&banner.replace("{node}", &session.node.to_string())),
            None => Reply::none(),
        })
    }

    async fn on_data(&mut self, data: &[u8]) -> Result<Reply, HandlerError> {
        match data.iter().position(|byte| *byte == EOT) {
            Some(end) => Ok(Reply::data(&data[..end]).and_hangup()),
            None => Ok(Reply::data(data)),
        }
    }
}

/// Factory for [`EchoHandler`]s sharing one banner
#[derive(Debug, Clone, Default)]
pub struct EchoFactory {
    banner: Option<String>,
}

impl EchoFactory {
    pub fn new(banner: Option<String>) -> Self {
        Self { banner }
    }
}

impl HandlerFactory for EchoFactory {
    fn create(&self, _session: &SessionInfo) -> Box<dyn SessionHandler> {
        match &self.banner {
            Some(banner) => Box::new(EchoHandler::with_banner(banner.clone())),
            None => Box::new(EchoHandler::new()),
        }
    }
}
