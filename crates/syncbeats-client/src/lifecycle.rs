use syncbeats_core::room::{RoomState, normalize_room_code};
use syncbeats_core::sync::SyncCommand;

use crate::error::Rejection;

/// Where the client stands with respect to a room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoomPhase {
    #[default]
    Idle,
    /// A create or join request is in flight.
    Entering,
    InRoom {
        room_code: String,
    },
}

/// Room membership bookkeeping: guards create, join and leave, and keeps the
/// code needed to get back in after a reconnect.
#[derive(Debug, Default)]
pub struct RoomLifecycle {
    phase: RoomPhase,
}

impl RoomLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &RoomPhase {
        &self.phase
    }

    pub fn room_code(&self) -> Option<&str> {
        match &self.phase {
            RoomPhase::InRoom { room_code } => Some(room_code),
            _ => None,
        }
    }

    pub fn in_room(&self) -> bool {
        matches!(self.phase, RoomPhase::InRoom { .. })
    }

    fn ensure_free(&self) -> Result<(), Rejection> {
        match self.phase {
            RoomPhase::Idle => Ok(()),
            RoomPhase::Entering | RoomPhase::InRoom { .. } => Err(Rejection::AlreadyInRoom),
        }
    }

    pub fn begin_create(&mut self) -> Result<(), Rejection> {
        self.ensure_free()?;
        self.phase = RoomPhase::Entering;
        Ok(())
    }

    /// Normalize `raw` and mark the join as in flight.
    pub fn begin_join(&mut self, raw: &str) -> Result<String, Rejection> {
        self.ensure_free()?;
        let code = normalize_room_code(raw)?;
        self.phase = RoomPhase::Entering;
        Ok(code)
    }

    pub fn require_room(&self) -> Result<&str, Rejection> {
        self.room_code().ok_or(Rejection::NotInRoom)
    }

    pub fn entered(&mut self, room_code: String) {
        tracing::info!(room = %room_code, "Entered room");
        self.phase = RoomPhase::InRoom { room_code };
    }

    /// A create or join did not go through.
    pub fn entry_failed(&mut self) {
        if self.phase == RoomPhase::Entering {
            self.phase = RoomPhase::Idle;
        }
    }

    pub fn reset(&mut self) {
        if let RoomPhase::InRoom { room_code } = &self.phase {
            tracing::info!(room = %room_code, "Left room");
        }
        self.phase = RoomPhase::Idle;
    }
}

/// A room that is already playing when we arrive: start from the server's
/// position right away.
pub fn late_join_command(state: &RoomState, now_millis: u64) -> Option<SyncCommand> {
    if state.is_playing && state.current_track.is_some() {
        Some(SyncCommand::Play {
            start_time_offset: state.current_time,
            activate_at: now_millis,
        })
    } else {
        None
    }
}

/// After a reconnect, decide how to bring local playback back in line with a
/// fresh snapshot. `None` means local playback already agrees.
pub fn resync_command(
    state: &RoomState,
    locally_playing: bool,
    now_millis: u64,
) -> Option<SyncCommand> {
    state.current_track.as_ref()?;
    match (state.is_playing, locally_playing) {
        (true, false) => late_join_command(state, now_millis),
        (false, true) => Some(SyncCommand::Pause {
            position_offset: Some(state.current_time),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use syncbeats_core::room::RoomCodeError;
    use syncbeats_core::test_helpers::{room_snapshot, sample_track};

    use super::*;

    #[test]
    fn join_normalizes_code() {
        let mut lifecycle = RoomLifecycle::new();
        assert_eq!(lifecycle.begin_join("  abcd-1234 ").unwrap(), "ABCD-1234");
        assert_eq!(lifecycle.phase(), &RoomPhase::Entering);
    }

    #[test]
    fn join_rejects_bad_codes_without_state_change() {
        let mut lifecycle = RoomLifecycle::new();
        assert_eq!(
            lifecycle.begin_join("   "),
            Err(Rejection::InvalidRoomCode(RoomCodeError::Empty))
        );
        assert_eq!(
            lifecycle.begin_join("ab"),
            Err(Rejection::InvalidRoomCode(RoomCodeError::Length(2)))
        );
        assert_eq!(lifecycle.phase(), &RoomPhase::Idle);
    }

    #[test]
    fn cannot_enter_twice() {
        let mut lifecycle = RoomLifecycle::new();
        lifecycle.begin_create().unwrap();
        assert_eq!(lifecycle.begin_join("ROOM"), Err(Rejection::AlreadyInRoom));
        lifecycle.entered("ROOM".to_string());
        assert_eq!(lifecycle.begin_create(), Err(Rejection::AlreadyInRoom));
    }

    #[test]
    fn failed_entry_returns_to_idle() {
        let mut lifecycle = RoomLifecycle::new();
        lifecycle.begin_create().unwrap();
        lifecycle.entry_failed();
        assert_eq!(lifecycle.phase(), &RoomPhase::Idle);
        assert!(lifecycle.begin_create().is_ok());
    }

    #[test]
    fn entry_failure_does_not_evict_room() {
        let mut lifecycle = RoomLifecycle::new();
        lifecycle.entered("ROOM".to_string());
        lifecycle.entry_failed();
        assert_eq!(lifecycle.room_code(), Some("ROOM"));
    }

    #[test]
    fn leave_requires_room() {
        let mut lifecycle = RoomLifecycle::new();
        assert_eq!(lifecycle.require_room(), Err(Rejection::NotInRoom));
        lifecycle.entered("ROOM".to_string());
        assert_eq!(lifecycle.require_room(), Ok("ROOM"));
        lifecycle.reset();
        assert!(!lifecycle.in_room());
    }

    #[test]
    fn late_joiner_syncs_to_server_position() {
        let mut state = room_snapshot("ROOM", &["host", "me"]);
        state.current_track = Some(sample_track());
        state.is_playing = true;
        state.current_time = 42.3;
        assert_eq!(
            late_join_command(&state, 1_000),
            Some(SyncCommand::Play {
                start_time_offset: 42.3,
                activate_at: 1_000
            })
        );

        state.is_playing = false;
        assert_eq!(late_join_command(&state, 1_000), None);
    }

    #[test]
    fn late_join_needs_a_track() {
        let mut state = room_snapshot("ROOM", &["host", "me"]);
        state.is_playing = true;
        assert_eq!(late_join_command(&state, 0), None);
    }

    #[test]
    fn resync_only_corrects_disagreement() {
        let mut state = room_snapshot("ROOM", &["host", "me"]);
        state.current_track = Some(sample_track());
        state.current_time = 10.0;

        state.is_playing = true;
        assert!(matches!(
            resync_command(&state, false, 5),
            Some(SyncCommand::Play { .. })
        ));
        assert_eq!(resync_command(&state, true, 5), None);

        state.is_playing = false;
        assert_eq!(
            resync_command(&state, true, 5),
            Some(SyncCommand::Pause {
                position_offset: Some(10.0)
            })
        );
        assert_eq!(resync_command(&state, false, 5), None);
    }
}
