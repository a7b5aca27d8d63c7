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

//! Registry of live sessions
//!
//! The registry owns the node pool and the record of every session between
//! accept and termination. Entries are locked per shard, so sessions on
//! different shards never contend with each other.

use crate::error::RegistryError;
use crate::session::Session;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nodelink_common::{NodeNumber, SessionId, SessionInfo};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Session registry with a fixed pool of nodes
pub struct SessionRegistry {
    /// Live sessions by id
    sessions: DashMap<SessionId, Session>,

    /// Node occupancy, index 0 is node 1
    nodes: Box<[AtomicBool]>,

    /// Next session id to hand out
    next_id: AtomicU64,

    /// Live sessions, dropped only once their node is free again
    live: AtomicUsize,

    /// Woken whenever a session is removed
    removed: Notify,
}

impl SessionRegistry {
    /// Create a registry with `max_sessions` nodes
    pub fn new(max_sessions: usize) -> Self {
        let nodes = (0..max_sessions.min(usize::from(NodeNumber::MAX)))
            .map(|_| AtomicBool::new(false))
            .collect();

        Self {
            sessions: DashMap::new(),
            nodes,
            next_id: AtomicU64::new(1),
            live: AtomicUsize::new(0),
            removed: Notify::new(),
        }
    }

    /// Total number of nodes
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Hand out the next session id
    pub fn next_id(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Claim the lowest free node, if any
    pub fn claim_node(&self) -> Option<NodeNumber> {
        self.nodes.iter().enumerate().find_map(|(index, slot)| {
            slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| (index + 1) as NodeNumber)
        })
    }

    /// Return a node to the pool
    pub fn release_node(&self, node: NodeNumber) {
        if let Some(slot) = usize::from(node)
            .checked_sub(1)
            .and_then(|index| self.nodes.get(index))
        {
            slot.store(false, Ordering::Release);
        }
    }

    /// Add a session record
    ///
    /// The caller must already hold the session's node.
    pub fn add(&self, session: Session) -> Result<(), RegistryError> {
        match self.sessions.entry(session.id()) {
            Entry::Occupied(entry) => Err(RegistryError::Duplicate(*entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                self.live.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    /// Claim a node, assign an id and add a session for `remote_addr`
    ///
    /// Returns the new session's view and its cancellation token.
    pub fn register(
        &self,
        remote_addr: SocketAddr,
    ) -> Result<(SessionInfo, CancellationToken), RegistryError> {
        let node = self
            .claim_node()
            .ok_or(RegistryError::Capacity(self.capacity()))?;

        let cancel = CancellationToken::new();
        let session = Session::new(self.next_id(), node, remote_addr, cancel.clone());
        let info = session.info().clone();

        if let Err(e) = self.add(session) {
            self.release_node(node);
            return Err(e);
        }

        Ok((info, cancel))
    }

    /// Record the worker task driving a session
    ///
    /// Returns false if the session already ended.
    pub fn attach_task(&self, id: SessionId, task: AbortHandle) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.set_task(task);
                true
            }
            None => false,
        }
    }

    /// Remove a session and free its node
    ///
    /// Only the first caller for a given id receives the record; later calls
    /// are no-ops returning `None`.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        let (_, session) = self.sessions.remove(&id)?;
        self.release_node(session.node());
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.removed.notify_waiters();
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|session| session.info().clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of live sessions
    ///
    /// Whenever this is below capacity a node is free to claim.
    pub fn count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Live sessions ordered by id
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| entry.value().info().clone())
            .collect();
        sessions.sort_by_key(|info| info.id);
        sessions
    }

    /// Signal every live session to terminate without waiting for it
    ///
    /// Returns the number of sessions signalled.
    pub fn terminate_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.sessions.iter() {
            entry.value().terminate();
            signalled += 1;
        }
        signalled
    }

    /// Remove every remaining session, aborting its worker
    pub fn drain(&self) -> Vec<Session> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.remove(id))
            .inspect(|session| session.abort())
            .collect()
    }

    /// Wait until no sessions remain
    pub async fn wait_until_empty(&self) {
        loop {
            let removed = self.removed.notified();
            tokio::pin!(removed);
            removed.as_mut().enable();

            if self.is_empty() {
                return;
            }
            removed.await;
        }
    }
}
