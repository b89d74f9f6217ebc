use serde::Serialize;

use syncbeats_core::room::{RoomState, RoomStateError, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

/// Change of role caused by replacing the room snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTransition {
    Promoted,
    Demoted,
    Unchanged,
}

impl RoleTransition {
    pub fn between(previous: Role, current: Role) -> Self {
        match (previous, current) {
            (Role::Guest, Role::Host) => Self::Promoted,
            (Role::Host, Role::Guest) => Self::Demoted,
            _ => Self::Unchanged,
        }
    }
}

/// Holds the last authoritative room snapshot. Snapshots are only ever
/// replaced whole, never merged.
#[derive(Debug, Default)]
pub struct RoomReconciler {
    local_id: Option<UserId>,
    state: Option<RoomState>,
    stale: bool,
}

impl RoomReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and install `snapshot`, returning the role held before it.
    /// An invalid snapshot leaves the cached one in place.
    pub fn apply(&mut self, snapshot: RoomState) -> Result<Role, RoomStateError> {
        snapshot.validate()?;
        let previous = self.role();
        tracing::trace!(
            room = %snapshot.room_code,
            host = %snapshot.host_id,
            users = snapshot.user_count,
            "Room state replaced"
        );
        self.state = Some(snapshot);
        self.stale = false;
        Ok(previous)
    }

    /// Derived from the snapshot and local id, never stored.
    pub fn role(&self) -> Role {
        match (&self.state, &self.local_id) {
            (Some(state), Some(id)) if state.is_host(id) => Role::Host,
            _ => Role::Guest,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    pub fn state(&self) -> Option<&RoomState> {
        self.state.as_ref()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// The server assigns a fresh id on every connection.
    pub fn set_local_id(&mut self, id: UserId) {
        self.local_id = Some(id);
    }

    /// The snapshot may be out of date after a connection loss.
    pub fn mark_stale(&mut self) {
        if self.state.is_some() {
            self.stale = true;
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn clear(&mut self) {
        self.state = None;
        self.stale = false;
    }
}
