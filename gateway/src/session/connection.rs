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

//! Per-connection worker

use crate::config::ServerConfig;
use crate::error::HandlerError;
use crate::events::EventBus;
use crate::handler::{Reply, SessionHandler};
use crate::session::registry::SessionRegistry;
use futures::FutureExt;
use nodelink_common::{CloseReason, SessionInfo};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Timing and buffering applied to every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLimits {
    /// Longest wait for inbound data
    pub idle_timeout: Duration,

    /// Longest wait for a write to complete
    pub io_timeout: Duration,

    /// Size of the read buffer
    pub read_buffer_size: usize,
}

impl From<&ServerConfig> for SessionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            io_timeout: config.io_timeout,
            read_buffer_size: config.read_buffer_size,
        }
    }
}

/// Drives one accepted connection from greeting to teardown
pub struct ConnectionSession {
    info: SessionInfo,
    stream: TcpStream,
    handler: Box<dyn SessionHandler>,
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    events: EventBus,
    limits: SessionLimits,
}

impl ConnectionSession {
    pub fn new(
        info: SessionInfo,
        stream: TcpStream,
        handler: Box<dyn SessionHandler>,
        cancel: CancellationToken,
        registry: Arc<SessionRegistry>,
        events: EventBus,
        limits: SessionLimits,
    ) -> Self {
        Self {
            info,
            stream,
            handler,
            cancel,
            registry,
            events,
            limits,
        }
    }

    /// Serve the connection until it ends, then tear it down
    pub async fn run(mut self) -> CloseReason {
        tracing::debug!("Session {} on node {} started", self.info.id, self.info.node);
        let reason = self.serve().await;
        self.finish(reason).await
    }

    async fn serve(&mut self) -> CloseReason {
        let greeting = contain(self.handler.on_connect(&self.info)).await;
        if let Some(reason) = self.deliver(greeting).await {
            return reason;
        }

        let mut buffer = vec![0u8; self.limits.read_buffer_size];
        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,
                read = timeout(self.limits.idle_timeout, self.stream.read(&mut buffer)) => read,
            };

            let received = match read {
                Err(_) => return CloseReason::IdleTimeout,
                Ok(Ok(0)) => return CloseReason::PeerClosed,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => return CloseReason::Io(e.to_string()),
            };

            let reply = contain(self.handler.on_data(&buffer[..received])).await;
            if let Some(reason) = self.deliver(reply).await {
                return reason;
            }
        }
    }

    /// Write a handler reply; returns a reason if the session must end
    async fn deliver(&mut self, reply: Result<Reply, HandlerError>) -> Option<CloseReason> {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => return Some(CloseReason::Handler(e.to_string())),
        };

        if !reply.output.is_empty() {
            let write = async {
                self.stream.write_all(&reply.output).await?;
                self.stream.flush().await
            };
            match timeout(self.limits.io_timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Some(CloseReason::Io(e.to_string())),
                Err(_) => return Some(CloseReason::Io("write timed out".to_string())),
            }
        }

        reply.hangup.then_some(CloseReason::HungUp)
    }

    async fn finish(self, reason: CloseReason) -> CloseReason {
        let Self {
            info,
            mut stream,
            mut handler,
            registry,
            events,
            limits,
            ..
        } = self;

        let _ = timeout(limits.io_timeout, stream.shutdown()).await;
        drop(stream);

        if AssertUnwindSafe(handler.on_close(&reason))
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::warn!("Session {} handler panicked while closing", info.id);
        }

        // Whoever removes the record reports the close
        if registry.remove(info.id).is_some() {
            let message = format!(
                "Node {}: session {} from {} disconnected ({})",
                info.node, info.id, info.remote_addr, reason
            );
            if reason.is_error() {
                events.warn(message);
            } else {
                events.info(message);
            }
        }

        reason
    }
}

/// Run a handler call, turning a panic into an error for this session only
async fn contain<F>(call: F) -> Result<Reply, HandlerError>
where
    F: Future<Output = Result<Reply, HandlerError>>,
{
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or(Err(HandlerError::Panicked))
}
