use std::collections::HashMap;

use tokio::time::Instant;

use syncbeats_core::net::messages::{MessageType, RequestId};

/// Requests awaiting their acknowledgement, each with a deadline.
///
/// Removing an entry is the only way to resolve it, so every request
/// resolves exactly once: by its ack, by expiry, or by a connection drop.
#[derive(Debug)]
pub struct PendingRequests<P> {
    next_id: RequestId,
    entries: HashMap<RequestId, Entry<P>>,
}

#[derive(Debug)]
struct Entry<P> {
    kind: MessageType,
    deadline: Instant,
    payload: P,
}

impl<P> Default for PendingRequests<P> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }
}

impl<P> PendingRequests<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for the next outbound request.
    pub fn next_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    pub fn insert(&mut self, id: RequestId, kind: MessageType, deadline: Instant, payload: P) {
        self.entries.insert(
            id,
            Entry {
                kind,
                deadline,
                payload,
            },
        );
    }

    pub fn resolve(&mut self, id: RequestId) -> Option<(MessageType, P)> {
        self.entries.remove(&id).map(|e| (e.kind, e.payload))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Completes once the earliest deadline passes. Pending while empty.
    pub async fn next_expiry(&self) {
        match self.entries.values().map(|e| e.deadline).min() {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Remove every entry whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(MessageType, P)> {
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.resolve(id))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(MessageType, P)> {
        self.entries
            .drain()
            .map(|(_, e)| (e.kind, e.payload))
            .collect()
    }
}
