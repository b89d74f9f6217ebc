use syncbeats_core::net::messages::MessageType;
use syncbeats_core::net::protocol::ProtocolError;
use syncbeats_core::net::transport::TransportError;
use syncbeats_core::room::RoomCodeError;

use crate::role_gate::CommandKind;

/// Every failure the engine reports to callers or on the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    Transport(TransportError),
    Rejected(Rejection),
    Actuation(ActuationError),
    Protocol(ProtocolError),
    /// No acknowledgement arrived within the request timeout.
    TimedOut { request: MessageType },
    /// The session loop has stopped.
    SessionClosed,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Rejected(r) => write!(f, "rejected: {r}"),
            Self::Actuation(e) => write!(f, "playback error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::TimedOut { request } => write!(f, "{request} request timed out"),
            Self::SessionClosed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Actuation(e) => Some(e),
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<Rejection> for SyncError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

impl From<ActuationError> for SyncError {
    fn from(e: ActuationError) -> Self {
        Self::Actuation(e)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// A request refused locally before reaching the server, or refused by the
/// server in its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Only the host may issue this command.
    NotHost(CommandKind),
    InvalidRoomCode(RoomCodeError),
    AlreadyInRoom,
    NotInRoom,
    /// No track is loaded.
    NoTrack,
    /// The track's duration is not known yet.
    NotReady,
    /// The server has no counterpart for this command.
    Unsupported(CommandKind),
    /// The server answered `success: false`.
    Server(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotHost(kind) => write!(f, "{kind} is host-only"),
            Self::InvalidRoomCode(e) => write!(f, "{e}"),
            Self::AlreadyInRoom => write!(f, "already in a room"),
            Self::NotInRoom => write!(f, "not in a room"),
            Self::NoTrack => write!(f, "no track loaded"),
            Self::NotReady => write!(f, "track is not ready yet"),
            Self::Unsupported(kind) => write!(f, "{kind} is coming soon"),
            Self::Server(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Rejection {}

impl From<RoomCodeError> for Rejection {
    fn from(e: RoomCodeError) -> Self {
        Self::InvalidRoomCode(e)
    }
}

/// Failure of the local playback engine to carry out a command.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationError {
    NotLoaded,
    InvalidPosition(f64),
    Playback(String),
}

impl std::fmt::Display for ActuationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "no source loaded"),
            Self::InvalidPosition(p) => write!(f, "invalid position: {p}"),
            Self::Playback(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ActuationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            SyncError::Rejected(Rejection::NotHost(CommandKind::Play)).to_string(),
            "rejected: play is host-only"
        );
        assert_eq!(
            SyncError::TimedOut {
                request: MessageType::JoinRoom
            }
            .to_string(),
            "join-room request timed out"
        );
        assert_eq!(
            Rejection::Unsupported(CommandKind::NextTrack).to_string(),
            "next track is coming soon"
        );
        assert_eq!(
            SyncError::from(TransportError::NotConnected).to_string(),
            "transport error: not connected"
        );
    }

    #[test]
    fn source_chains_inner_error() {
        use std::error::Error;
        let err = SyncError::from(ActuationError::NotLoaded);
        assert_eq!(err.source().unwrap().to_string(), "no source loaded");
        assert!(SyncError::SessionClosed.source().is_none());
    }
}
