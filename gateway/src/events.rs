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

//! Status event bus
//!
//! Every component of the server reports what it is doing here. Observers
//! (the operator console, a UI, a test) subscribe and receive each event in
//! publish order. Each subscriber owns a bounded buffer; a subscriber that
//! falls behind loses its oldest events rather than slowing the publisher.

use nodelink_common::{StatusEvent, StatusLevel};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default number of events buffered per subscriber
pub const DEFAULT_CAPACITY: usize = 256;

/// Identifier handed out with each subscription
pub type SubscriptionId = u64;

/// Publish/subscribe channel for status events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
    next_subscription: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the default per-subscriber buffer
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus buffering up to `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Deliver an event to every current subscriber
    ///
    /// Never blocks. Publishing with no subscribers is not an error.
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!(level = %event.level, "{}", event.message);
        let _ = self.sender.send(event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(StatusEvent::new(StatusLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.publish(StatusEvent::new(StatusLevel::Warning, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(StatusEvent::new(StatusLevel::Error, message));
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Status subscriber {} attached", id);
        Subscription {
            id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Detach a subscriber; equivalent to dropping the subscription
    pub fn unsubscribe(&self, subscription: Subscription) {
        tracing::debug!("Status subscriber {} detached", subscription.id);
        drop(subscription);
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a status subscription
pub struct Subscription {
    id: SubscriptionId,
    receiver: broadcast::Receiver<StatusEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event
    ///
    /// Returns `None` once every [`EventBus`] handle has been dropped.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => self.lagged(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => self.lagged(missed),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event from a thread outside the runtime
    pub fn blocking_recv(&mut self) -> Option<StatusEvent> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => self.lagged(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event currently buffered
    pub fn drain(&mut self) -> Vec<StatusEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn lagged(&self, missed: u64) {
        tracing::warn!(
            "Status subscriber {} fell behind, dropped {} oldest event(s)",
            self.id,
            missed
        );
    }
}
