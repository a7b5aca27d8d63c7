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

//! Session tracking for the node server
//!
//! A [`Session`] is the registry's record of one accepted connection. The
//! connection itself is driven by a [`connection::ConnectionSession`] worker;
//! the record carries what the rest of the server needs to observe or stop it.

pub mod connection;
pub mod registry;

use chrono::Utc;
use nodelink_common::{NodeNumber, SessionId, SessionInfo};
use std::net::SocketAddr;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Registry record for a live session
#[derive(Debug)]
pub struct Session {
    info: SessionInfo,
    cancel: CancellationToken,
    task: Option<AbortHandle>,
}

impl Session {
    /// Create a session record stamped with the current time
    pub fn new(
        id: SessionId,
        node: NodeNumber,
        remote_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            info: SessionInfo {
                id,
                node,
                remote_addr,
                connected_at: Utc::now(),
            },
            cancel,
            task: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.info.id
    }

    pub fn node(&self) -> NodeNumber {
        self.info.node
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote_addr
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Token the session worker watches for shutdown
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the worker to wind the session down at its next blocking point
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminating(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn set_task(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    /// Stop the worker immediately, dropping its socket
    pub fn abort(&self) {
        self.cancel.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        Session::new(
            SessionId::new(1),
            1,
            "127.0.0.1:40000".parse().unwrap(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_session_creation() {
        let session = test_session();
        assert_eq!(session.id(), SessionId::new(1));
        assert_eq!(session.node(), 1);
        assert_eq!(session.remote_addr().port(), 40000);
        assert_eq!(session.info().id, session.id());
        assert!(!session.is_terminating());
    }

    #[test]
    fn test_session_terminate_cancels_token() {
        let session = test_session();
        let token = session.cancellation().clone();
        session.terminate();
        assert!(session.is_terminating());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_session_abort_stops_task() {
        let mut session = test_session();
        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        session.set_task(task.abort_handle());

        session.abort();

        let result = task.await;
        assert!(result.unwrap_err().is_cancelled());
        assert!(session.is_terminating());
    }
}
