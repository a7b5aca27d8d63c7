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

//! Server lifecycle control
//!
//! [`ServerController`] is the only way to start and stop the node server.
//! Every transition of its [`ServerState`] happens while holding the
//! lifecycle lock, so concurrent callers see one consistent order of starts
//! and stops no matter which task or thread they call from.

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::events::{EventBus, Subscription};
use crate::handler::HandlerFactory;
use crate::listener::ListenerLoop;
use crate::session::registry::SessionRegistry;
use nodelink_common::{CloseReason, ServerState, SessionInfo};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Resources of a started server
struct Running {
    config: ServerConfig,
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

/// Owns the listener and session registry and drives the server lifecycle
pub struct ServerController {
    events: EventBus,
    handlers: Arc<dyn HandlerFactory>,
    state: Arc<watch::Sender<ServerState>>,
    lifecycle: Arc<Mutex<Option<Running>>>,
}

impl ServerController {
    /// Create a stopped server that hands connections to `handlers`
    pub fn new(handlers: Arc<dyn HandlerFactory>) -> Self {
        Self::with_events(EventBus::new(), handlers)
    }

    /// Create a stopped server publishing to an existing event bus
    pub fn with_events(events: EventBus, handlers: Arc<dyn HandlerFactory>) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            events,
            handlers,
            state: Arc::new(state),
            lifecycle: Arc::new(Mutex::new(None)),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Receiver notified of every state transition
    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to the server's status events
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Bind the listener and start accepting connections
    ///
    /// Returns the bound address once the listener is running; connection
    /// handling continues in the background.
    pub async fn start(&self, config: ServerConfig) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() != ServerState::Stopped {
            return Err(ServerError::AlreadyRunning);
        }

        if let Err(reason) = config.validate() {
            self.events
                .error(format!("Invalid server configuration: {}", reason));
            return Err(ServerError::InvalidConfig(reason));
        }

        transition(&self.state, ServerState::Starting);
        let bind_addr = config.socket_addr();
        tracing::info!("Starting node server on {}", bind_addr);

        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                transition(&self.state, ServerState::Stopped);
                self.events
                    .error(format!("Unable to bind {}: {}", bind_addr, source));
                return Err(ServerError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                transition(&self.state, ServerState::Stopped);
                self.events
                    .error(format!("Unable to bind {}: {}", bind_addr, source));
                return Err(ServerError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };

        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let cancel = CancellationToken::new();
        let listener_loop = ListenerLoop::new(
            listener,
            Arc::clone(&registry),
            self.events.clone(),
            Arc::clone(&self.handlers),
            &config,
            cancel.clone(),
        );
        let listener = tokio::spawn(listener_loop.run());

        let nodes = config.max_sessions;
        *lifecycle = Some(Running {
            config,
            local_addr,
            registry,
            cancel,
            listener: Some(listener),
        });
        transition(&self.state, ServerState::Running);
        self.events
            .info(format!("Server started on {} ({} nodes)", local_addr, nodes));

        Ok(local_addr)
    }

    /// Stop accepting, end every session and wait for them to go away
    ///
    /// Sessions get the configured grace period to finish; any still alive
    /// afterwards are closed by force. Returns [`ServerError::NotRunning`]
    /// unless the server was running, including while another stop is
    /// already in progress. Once begun, shutdown runs to completion on its
    /// own task even if the caller stops waiting for it.
    pub async fn stop(&self) -> Result<()> {
        let shutdown = {
            let mut lifecycle = self.lifecycle.lock().await;
            if self.state() != ServerState::Running {
                return Err(ServerError::NotRunning);
            }
            let Some(running) = lifecycle.as_mut() else {
                return Err(ServerError::NotRunning);
            };
            transition(&self.state, ServerState::Stopping);
            Shutdown {
                listener: running.listener.take(),
                cancel: running.cancel.clone(),
                registry: Arc::clone(&running.registry),
                grace: running.config.shutdown_grace,
                events: self.events.clone(),
                state: Arc::clone(&self.state),
                lifecycle: Arc::clone(&self.lifecycle),
            }
        };

        if let Err(e) = tokio::spawn(shutdown.run()).await {
            tracing::error!("Shutdown task failed: {}", e);
        }

        Ok(())
    }

    /// Address the listener is bound to while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Configuration the server was started with
    pub async fn config(&self) -> Option<ServerConfig> {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|running| running.config.clone())
    }

    /// Registry of the running server
    pub async fn registry(&self) -> Option<Arc<SessionRegistry>> {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|running| Arc::clone(&running.registry))
    }

    /// Number of live sessions, zero when stopped
    pub async fn session_count(&self) -> usize {
        self.registry()
            .await
            .map(|registry| registry.count())
            .unwrap_or_default()
    }

    /// Live sessions ordered by id, empty when stopped
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.registry()
            .await
            .map(|registry| registry.snapshot())
            .unwrap_or_default()
    }

}

fn transition(state: &watch::Sender<ServerState>, next: ServerState) {
    let previous = state.send_replace(next);
    tracing::debug!("Server state {} -> {}", previous, next);
}

/// Everything needed to bring a stopping server down to Stopped
struct Shutdown {
    listener: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    grace: Duration,
    events: EventBus,
    state: Arc<watch::Sender<ServerState>>,
    lifecycle: Arc<Mutex<Option<Running>>>,
}

impl Shutdown {
    async fn run(self) {
        let Self {
            listener,
            cancel,
            registry,
            grace,
            events,
            state,
            lifecycle,
        } = self;

        events.info("Server stopping");

        cancel.cancel();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                events.error(format!("Listener task failed: {}", e));
            }
        }

        let signalled = registry.terminate_all();
        if signalled > 0 {
            events.info(format!("Signalled {} session(s) to terminate", signalled));
        }

        if tokio::time::timeout(grace, registry.wait_until_empty())
            .await
            .is_err()
        {
            for session in registry.drain() {
                events.warn(format!(
                    "Node {}: session {} from {} disconnected ({} after {:?} grace period)",
                    session.node(),
                    session.id(),
                    session.remote_addr(),
                    CloseReason::Forced,
                    grace
                ));
            }
        }

        let mut lifecycle = lifecycle.lock().await;
        *lifecycle = None;
        transition(&state, ServerState::Stopped);
        events.info("Server stopped");
    }
}

impl Drop for ServerController {
    fn drop(&mut self) {
        if let Ok(mut lifecycle) = self.lifecycle.try_lock() {
            if let Some(running) = lifecycle.take() {
                running.cancel.cancel();
                running.registry.terminate_all();
            }
        }
    }
}
