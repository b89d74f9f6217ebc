use serde::{Deserialize, Serialize};

use crate::room::{RoomState, Track, UserId};
use crate::sync::SyncCommand;

/// Correlates an outbound request with the server's acknowledgement.
pub type RequestId = u32;

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server (requests, each acknowledged)
    CreateRoom = 0x01,
    JoinRoom = 0x02,
    LeaveRoom = 0x03,
    SetTrack = 0x04,
    Play = 0x05,
    Pause = 0x06,
    Seek = 0x07,
    GetRoomState = 0x08,
    Ping = 0x09,

    // Server -> Client
    Ack = 0x10,
    Connected = 0x11,
    UserJoined = 0x12,
    UserLeft = 0x13,
    HostChanged = 0x14,
    TrackChanged = 0x15,
    SyncPlay = 0x16,
    SyncPause = 0x17,
    SyncSeek = 0x18,
    ServerShutdown = 0x19,
    Error = 0x1A,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::CreateRoom),
            0x02 => Some(Self::JoinRoom),
            0x03 => Some(Self::LeaveRoom),
            0x04 => Some(Self::SetTrack),
            0x05 => Some(Self::Play),
            0x06 => Some(Self::Pause),
            0x07 => Some(Self::Seek),
            0x08 => Some(Self::GetRoomState),
            0x09 => Some(Self::Ping),
            0x10 => Some(Self::Ack),
            0x11 => Some(Self::Connected),
            0x12 => Some(Self::UserJoined),
            0x13 => Some(Self::UserLeft),
            0x14 => Some(Self::HostChanged),
            0x15 => Some(Self::TrackChanged),
            0x16 => Some(Self::SyncPlay),
            0x17 => Some(Self::SyncPause),
            0x18 => Some(Self::SyncSeek),
            0x19 => Some(Self::ServerShutdown),
            0x1A => Some(Self::Error),
            _ => None,
        }
    }

    /// Event name used by the coordinating server.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateRoom => "create-room",
            Self::JoinRoom => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::SetTrack => "set-track",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
            Self::GetRoomState => "get-room-state",
            Self::Ping => "ping",
            Self::Ack => "ack",
            Self::Connected => "connected",
            Self::UserJoined => "user-joined",
            Self::UserLeft => "user-left",
            Self::HostChanged => "host-changed",
            Self::TrackChanged => "track-changed",
            Self::SyncPlay => "sync-play",
            Self::SyncPause => "sync-pause",
            Self::SyncSeek => "sync-seek",
            Self::ServerShutdown => "server-shutdown",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Client -> Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomMsg {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomMsg {
    pub request_id: RequestId,
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRoomMsg {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTrackMsg {
    pub request_id: RequestId,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayMsg {
    pub request_id: RequestId,
    pub position_offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseMsg {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekMsg {
    pub request_id: RequestId,
    pub position_offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRoomStateMsg {
    pub request_id: RequestId,
}

/// Heartbeat probe. The server echoes `timestamp` in its ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingMsg {
    pub request_id: RequestId,
    pub timestamp: u64,
}

/// Every client message is a request answered by exactly one [`AckMsg`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CreateRoom(CreateRoomMsg),
    JoinRoom(JoinRoomMsg),
    LeaveRoom(LeaveRoomMsg),
    SetTrack(SetTrackMsg),
    Play(PlayMsg),
    Pause(PauseMsg),
    Seek(SeekMsg),
    GetRoomState(GetRoomStateMsg),
    Ping(PingMsg),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CreateRoom(_) => MessageType::CreateRoom,
            Self::JoinRoom(_) => MessageType::JoinRoom,
            Self::LeaveRoom(_) => MessageType::LeaveRoom,
            Self::SetTrack(_) => MessageType::SetTrack,
            Self::Play(_) => MessageType::Play,
            Self::Pause(_) => MessageType::Pause,
            Self::Seek(_) => MessageType::Seek,
            Self::GetRoomState(_) => MessageType::GetRoomState,
            Self::Ping(_) => MessageType::Ping,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::CreateRoom(m) => m.request_id,
            Self::JoinRoom(m) => m.request_id,
            Self::LeaveRoom(m) => m.request_id,
            Self::SetTrack(m) => m.request_id,
            Self::Play(m) => m.request_id,
            Self::Pause(m) => m.request_id,
            Self::Seek(m) => m.request_id,
            Self::GetRoomState(m) => m.request_id,
            Self::Ping(m) => m.request_id,
        }
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Acknowledgement of a client request: `{success, ...}` or
/// `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMsg {
    pub request_id: RequestId,
    pub success: bool,
    pub room_code: Option<String>,
    pub is_host: Option<bool>,
    pub room_state: Option<RoomState>,
    /// Echo of a ping's timestamp.
    pub timestamp: Option<u64>,
    pub error: Option<String>,
}

impl AckMsg {
    pub fn ok(request_id: RequestId) -> Self {
        Self {
            request_id,
            success: true,
            room_code: None,
            is_host: None,
            room_state: None,
            timestamp: None,
            error: None,
        }
    }

    pub fn rejected(request_id: RequestId, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::ok(request_id)
        }
    }

    pub fn with_room(mut self, room_state: RoomState, is_host: bool) -> Self {
        self.room_code = Some(room_state.room_code.clone());
        self.is_host = Some(is_host);
        self.room_state = Some(room_state);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedMsg {
    pub session_id: UserId,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJoinedMsg {
    pub user_id: UserId,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLeftMsg {
    pub user_id: UserId,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostChangedMsg {
    pub new_host_id: UserId,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackChangedMsg {
    pub track: Track,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPlayMsg {
    pub start_time_offset: f64,
    pub activate_at: u64,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPauseMsg {
    pub position_offset: Option<f64>,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSeekMsg {
    pub position_offset: f64,
    pub activate_at: u64,
    pub resume_playing: bool,
    pub room_state: RoomState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerShutdownMsg {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Ack(AckMsg),
    Connected(ConnectedMsg),
    UserJoined(UserJoinedMsg),
    UserLeft(UserLeftMsg),
    HostChanged(HostChangedMsg),
    TrackChanged(TrackChangedMsg),
    SyncPlay(SyncPlayMsg),
    SyncPause(SyncPauseMsg),
    SyncSeek(SyncSeekMsg),
    ServerShutdown(ServerShutdownMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Ack(_) => MessageType::Ack,
            Self::Connected(_) => MessageType::Connected,
            Self::UserJoined(_) => MessageType::UserJoined,
            Self::UserLeft(_) => MessageType::UserLeft,
            Self::HostChanged(_) => MessageType::HostChanged,
            Self::TrackChanged(_) => MessageType::TrackChanged,
            Self::SyncPlay(_) => MessageType::SyncPlay,
            Self::SyncPause(_) => MessageType::SyncPause,
            Self::SyncSeek(_) => MessageType::SyncSeek,
            Self::ServerShutdown(_) => MessageType::ServerShutdown,
            Self::Error(_) => MessageType::Error,
        }
    }

    /// The room snapshot carried by room-changing events.
    pub fn room_state(&self) -> Option<&RoomState> {
        match self {
            Self::UserJoined(m) => Some(&m.room_state),
            Self::UserLeft(m) => Some(&m.room_state),
            Self::HostChanged(m) => Some(&m.room_state),
            Self::TrackChanged(m) => Some(&m.room_state),
            Self::SyncPlay(m) => Some(&m.room_state),
            Self::SyncPause(m) => Some(&m.room_state),
            Self::SyncSeek(m) => Some(&m.room_state),
            Self::Ack(m) => m.room_state.as_ref(),
            Self::Connected(_) | Self::ServerShutdown(_) | Self::Error(_) => None,
        }
    }

    /// The transport transition carried by `sync-*` events.
    pub fn sync_command(&self) -> Option<SyncCommand> {
        match self {
            Self::SyncPlay(m) => Some(SyncCommand::Play {
                start_time_offset: m.start_time_offset,
                activate_at: m.activate_at,
            }),
            Self::SyncPause(m) => Some(SyncCommand::Pause {
                position_offset: m.position_offset,
            }),
            Self::SyncSeek(m) => Some(SyncCommand::Seek {
                position_offset: m.position_offset,
                activate_at: m.activate_at,
                resume_playing: m.resume_playing,
            }),
            _ => None,
        }
    }
}
