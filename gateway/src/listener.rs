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

//! Accept loop for the node server

use crate::config::ServerConfig;
use crate::error::RegistryError;
use crate::events::EventBus;
use crate::handler::HandlerFactory;
use crate::session::connection::{ConnectionSession, SessionLimits};
use crate::session::registry::SessionRegistry;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// First pause after a failed accept, doubled per consecutive failure
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Longest pause between failed accepts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Source of inbound connections for a [`ListenerLoop`]
#[async_trait]
pub trait Accept: Send {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)>;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Owns the bound socket and turns accepted connections into sessions
pub struct ListenerLoop<A = TcpListener> {
    listener: A,
    registry: Arc<SessionRegistry>,
    events: EventBus,
    handlers: Arc<dyn HandlerFactory>,
    limits: SessionLimits,
    busy_message: Option<Arc<str>>,
    cancel: CancellationToken,
}

impl<A: Accept> ListenerLoop<A> {
    pub fn new(
        listener: A,
        registry: Arc<SessionRegistry>,
        events: EventBus,
        handlers: Arc<dyn HandlerFactory>,
        config: &ServerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            listener,
            registry,
            events,
            handlers,
            limits: SessionLimits::from(config),
            busy_message: config.busy_message.as_deref().map(Arc::from),
            cancel,
        }
    }

    /// Accept connections until cancelled, then close the socket
    pub async fn run(mut self) {
        let local_addr = self.listener.local_addr().ok();
        let mut backoff = ACCEPT_BACKOFF;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff = ACCEPT_BACKOFF;
                    self.admit(stream, peer);
                }
                Err(e) if !is_transient(&e) => {
                    self.events
                        .error(format!("Listener failed, no longer accepting: {}", e));
                    break;
                }
                Err(e) => {
                    self.events
                        .warn(format!("Accept error: {} (retrying in {:?})", e, backoff));
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }

        drop(self.listener);
        match local_addr {
            Some(addr) => self.events.info(format!("Listener on {} closed", addr)),
            None => self.events.info("Listener closed"),
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Unable to set TCP_NODELAY for {}: {}", peer, e);
        }

        let (info, cancel) = match self.registry.register(peer) {
            Ok(admitted) => admitted,
            Err(RegistryError::Capacity(nodes)) => {
                self.refuse(stream, peer, nodes);
                return;
            }
            Err(e) => {
                self.events
                    .error(format!("Unable to register connection from {}: {}", peer, e));
                return;
            }
        };

        let created = std::panic::catch_unwind(AssertUnwindSafe(|| self.handlers.create(&info)));
        let handler = match created {
            Ok(handler) => handler,
            Err(_) => {
                // Dropping the stream hangs up on the caller
                self.registry.remove(info.id);
                self.events.error(format!(
                    "Node {}: no handler for session {} from {}, handler factory panicked",
                    info.node, info.id, peer
                ));
                return;
            }
        };

        self.events.info(format!(
            "Node {}: connection accepted from {} (session {})",
            info.node, peer, info.id
        ));

        let id = info.id;
        let session = ConnectionSession::new(
            info,
            stream,
            handler,
            cancel,
            Arc::clone(&self.registry),
            self.events.clone(),
            self.limits.clone(),
        );
        let task = tokio::spawn(session.run());
        self.registry.attach_task(id, task.abort_handle());
    }

    /// Tell the caller every node is busy and hang up without queueing
    fn refuse(&self, mut stream: TcpStream, peer: SocketAddr, nodes: usize) {
        self.events.warn(format!(
            "connection refused: capacity (all {} nodes busy, caller {})",
            nodes, peer
        ));

        let busy_message = self.busy_message.clone();
        let io_timeout = self.limits.io_timeout;
        tokio::spawn(async move {
            if let Some(message) = busy_message {
                let _ = timeout(io_timeout, stream.write_all(message.as_bytes())).await;
            }
            let _ = timeout(io_timeout, stream.shutdown()).await;
        });
    }
}

/// Accept failures that leave the listening socket usable
///
/// Per-connection failures and resource exhaustion clear up on their own;
/// an invalid or disconnected socket never will.
fn is_transient(error: &std::io::Error) -> bool {
    !matches!(
        error.kind(),
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{EchoFactory, EchoHandler, SessionHandler};
    use nodelink_common::SessionInfo;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    struct Harness {
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
        subscription: crate::events::Subscription,
    }

    /// Accepts for real once its scripted failures are used up
    struct Scripted {
        inner: TcpListener,
        script: VecDeque<Option<std::io::Error>>,
    }

    #[async_trait]
    impl Accept for Scripted {
        async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
            match self.script.pop_front() {
                Some(Some(error)) => Err(error),
                _ => self.inner.accept().await,
            }
        }

        fn local_addr(&self) -> std::io::Result<SocketAddr> {
            self.inner.local_addr()
        }
    }

    async fn scripted(script: Vec<Option<std::io::Error>>) -> Scripted {
        Scripted {
            inner: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            script: script.into(),
        }
    }

    fn aborted() -> Option<std::io::Error> {
        Some(std::io::Error::from(std::io::ErrorKind::ConnectionAborted))
    }

    async fn start(config: ServerConfig, handlers: Arc<dyn HandlerFactory>) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        start_with(listener, config, handlers).await
    }

    async fn start_with<A: Accept + 'static>(
        listener: A,
        config: ServerConfig,
        handlers: Arc<dyn HandlerFactory>,
    ) -> Harness {
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let events = EventBus::new();
        let subscription = events.subscribe();
        let cancel = CancellationToken::new();

        let listener_loop = ListenerLoop::new(
            listener,
            Arc::clone(&registry),
            events,
            handlers,
            &config,
            cancel.clone(),
        );
        let task = tokio::spawn(listener_loop.run());

        Harness {
            addr,
            registry,
            cancel,
            task,
            subscription,
        }
    }

    async fn wait_for_message<P>(subscription: &mut crate::events::Subscription, predicate: P) -> String
    where
        P: Fn(&str) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = subscription.recv().await.unwrap();
                if predicate(&event.message) {
                    return event.message;
                }
            }
        })
        .await
        .expect("status event never published")
    }

    async fn wait_for_count(registry: &SessionRegistry, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.count() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached expected count");
    }

    #[tokio::test]
    async fn test_accepts_and_registers() {
        let harness = start(ServerConfig::new(0), Arc::new(EchoFactory::default())).await;

        let mut client = TcpStream::connect(harness.addr).await.unwrap();
        wait_for_count(&harness.registry, 1).await;

        client.write_all(b"ping").await.unwrap();
        let mut buffer = [0u8; 4];
        client.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"ping");

        let snapshot = harness.registry.snapshot();
        assert_eq!(snapshot[0].node, 1);
        assert_eq!(snapshot[0].remote_addr, client.local_addr().unwrap());

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refuses_past_capacity() {
        let config = ServerConfig::new(0)
            .with_max_sessions(1)
            .with_busy_message("All nodes busy\r\n");
        let mut harness = start(config, Arc::new(EchoFactory::default())).await;

        let _first = TcpStream::connect(harness.addr).await.unwrap();
        wait_for_count(&harness.registry, 1).await;

        let mut second = TcpStream::connect(harness.addr).await.unwrap();
        let mut received = Vec::new();
        second.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"All nodes busy\r\n");
        assert_eq!(harness.registry.count(), 1);

        let refused: Vec<_> = harness
            .subscription
            .drain()
            .into_iter()
            .filter(|event| event.message.contains("connection refused: capacity"))
            .collect();
        assert_eq!(refused.len(), 1);

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[test]
    fn test_accept_error_classification() {
        use std::io::{Error, ErrorKind};
        assert!(is_transient(&Error::from(ErrorKind::ConnectionAborted)));
        assert!(is_transient(&Error::from(ErrorKind::ConnectionReset)));
        assert!(is_transient(&Error::other("too many open files")));
        assert!(!is_transient(&Error::from(ErrorKind::InvalidInput)));
        assert!(!is_transient(&Error::from(ErrorKind::NotConnected)));
    }

    #[tokio::test]
    async fn test_cancel_closes_socket() {
        let mut harness = start(ServerConfig::new(0), Arc::new(EchoFactory::default())).await;

        harness.cancel.cancel();
        harness.task.await.unwrap();

        assert!(TcpStream::connect(harness.addr).await.is_err());
        let closed = harness.subscription.drain();
        assert!(closed.iter().any(|event| event.message.contains("closed")));
    }

    #[tokio::test]
    async fn test_accept_does_not_wait_on_sessions() {
        let handlers = Arc::new(|_: &SessionInfo| -> Box<dyn SessionHandler> {
            Box::new(EchoHandler::with_banner("node {node}\r\n"))
        });
        let harness = start(ServerConfig::new(0), handlers).await;

        // Neither client sends anything, so both sessions stay blocked in read
        let mut first = TcpStream::connect(harness.addr).await.unwrap();
        let mut second = TcpStream::connect(harness.addr).await.unwrap();
        wait_for_count(&harness.registry, 2).await;

        let mut banner = [0u8; 8];
        first.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"node 1\r\n");
        second.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"node 2\r\n");

        harness.cancel.cancel();
        harness.task.await.unwrap();
        // The listener only stops accepting; sessions are stopped separately
        assert_eq!(harness.registry.count(), 2);
        harness.registry.terminate_all();
        wait_for_count(&harness.registry, 0).await;
    }

    #[tokio::test]
    async fn test_factory_panic_spares_listener() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers: Arc<dyn HandlerFactory> = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &SessionInfo| -> Box<dyn SessionHandler> {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("factory exploded");
                }
                Box::new(EchoHandler::new())
            })
        };
        let mut harness = start(ServerConfig::new(0).with_max_sessions(1), handlers).await;

        let mut first = TcpStream::connect(harness.addr).await.unwrap();
        let mut received = Vec::new();
        let _ = first.read_to_end(&mut received).await;
        assert!(received.is_empty());
        wait_for_message(&mut harness.subscription, |message| {
            message.contains("handler factory panicked")
        })
        .await;
        assert_eq!(harness.registry.count(), 0);

        // The only node was handed back, so the next caller gets it
        let mut second = TcpStream::connect(harness.addr).await.unwrap();
        second.write_all(b"ping").await.unwrap();
        let mut buffer = [0u8; 4];
        second.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"ping");
        assert_eq!(harness.registry.snapshot()[0].node, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_accept_error_keeps_accepting() {
        let listener = scripted(vec![aborted()]).await;
        let mut harness = start_with(
            listener,
            ServerConfig::new(0),
            Arc::new(EchoFactory::default()),
        )
        .await;

        let message =
            wait_for_message(&mut harness.subscription, |message| message.starts_with("Accept error"))
                .await;
        assert!(message.ends_with("(retrying in 10ms)"));

        let mut client = TcpStream::connect(harness.addr).await.unwrap();
        client.write_all(b"pong").await.unwrap();
        let mut buffer = [0u8; 4];
        client.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"pong");
        assert_eq!(harness.registry.count(), 1);

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_backoff_resets_after_success() {
        let listener = scripted(vec![aborted(), aborted(), None, aborted()]).await;
        let mut harness = start_with(
            listener,
            ServerConfig::new(0),
            Arc::new(EchoFactory::default()),
        )
        .await;

        let _client = TcpStream::connect(harness.addr).await.unwrap();
        wait_for_count(&harness.registry, 1).await;

        let mut retries = Vec::new();
        while retries.len() < 3 {
            retries.push(
                wait_for_message(&mut harness.subscription, |message| {
                    message.starts_with("Accept error")
                })
                .await,
            );
        }
        assert!(retries[0].ends_with("(retrying in 10ms)"));
        assert!(retries[1].ends_with("(retrying in 20ms)"));
        assert!(retries[2].ends_with("(retrying in 10ms)"));

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_accept_error_ends_loop() {
        let listener = scripted(vec![Some(std::io::Error::from(
            std::io::ErrorKind::InvalidInput,
        ))])
        .await;
        let mut harness = start_with(
            listener,
            ServerConfig::new(0),
            Arc::new(EchoFactory::default()),
        )
        .await;

        tokio::time::timeout(Duration::from_secs(2), &mut harness.task)
            .await
            .expect("listener kept running after a fatal error")
            .unwrap();

        let events: Vec<String> = harness
            .subscription
            .drain()
            .into_iter()
            .map(|event| event.message)
            .collect();
        assert!(events[0].starts_with("Listener failed"));
        assert!(events[1].ends_with("closed"));
        assert!(TcpStream::connect(harness.addr).await.is_err());
    }
}
