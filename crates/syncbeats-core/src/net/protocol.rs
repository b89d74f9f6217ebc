use serde::{Deserialize, Serialize};

use super::messages::{
    AckMsg, ClientMessage, ConnectedMsg, CreateRoomMsg, ErrorMsg, GetRoomStateMsg, HostChangedMsg,
    JoinRoomMsg, LeaveRoomMsg, MessageType, PauseMsg, PingMsg, PlayMsg, SeekMsg, ServerMessage,
    ServerShutdownMsg, SetTrackMsg, SyncPauseMsg, SyncPlayMsg, SyncSeekMsg, TrackChangedMsg,
    UserJoinedMsg, UserLeftMsg,
};

/// Current protocol version, reported by the server in `connected`.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    UnexpectedMessageType(MessageType),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
    InvalidRoomState(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::UnexpectedMessageType(t) => write!(f, "unexpected message type: {t}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
            Self::InvalidRoomState(e) => write!(f, "invalid room state: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<crate::room::RoomStateError> for ProtocolError {
    fn from(e: crate::room::RoomStateError) -> Self {
        Self::InvalidRoomState(e.to_string())
    }
}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    let ty = msg.message_type();
    match msg {
        ClientMessage::CreateRoom(m) => encode_message(ty, m),
        ClientMessage::JoinRoom(m) => encode_message(ty, m),
        ClientMessage::LeaveRoom(m) => encode_message(ty, m),
        ClientMessage::SetTrack(m) => encode_message(ty, m),
        ClientMessage::Play(m) => encode_message(ty, m),
        ClientMessage::Pause(m) => encode_message(ty, m),
        ClientMessage::Seek(m) => encode_message(ty, m),
        ClientMessage::GetRoomState(m) => encode_message(ty, m),
        ClientMessage::Ping(m) => encode_message(ty, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    let ty = msg.message_type();
    match msg {
        ServerMessage::Ack(m) => encode_message(ty, m),
        ServerMessage::Connected(m) => encode_message(ty, m),
        ServerMessage::UserJoined(m) => encode_message(ty, m),
        ServerMessage::UserLeft(m) => encode_message(ty, m),
        ServerMessage::HostChanged(m) => encode_message(ty, m),
        ServerMessage::TrackChanged(m) => encode_message(ty, m),
        ServerMessage::SyncPlay(m) => encode_message(ty, m),
        ServerMessage::SyncPause(m) => encode_message(ty, m),
        ServerMessage::SyncSeek(m) => encode_message(ty, m),
        ServerMessage::ServerShutdown(m) => encode_message(ty, m),
        ServerMessage::Error(m) => encode_message(ty, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::CreateRoom => Ok(ClientMessage::CreateRoom(decode_payload::<
            CreateRoomMsg,
        >(data)?)),
        MessageType::JoinRoom => Ok(ClientMessage::JoinRoom(decode_payload::<JoinRoomMsg>(
            data,
        )?)),
        MessageType::LeaveRoom => Ok(ClientMessage::LeaveRoom(decode_payload::<LeaveRoomMsg>(
            data,
        )?)),
        MessageType::SetTrack => Ok(ClientMessage::SetTrack(decode_payload::<SetTrackMsg>(
            data,
        )?)),
        MessageType::Play => Ok(ClientMessage::Play(decode_payload::<PlayMsg>(data)?)),
        MessageType::Pause => Ok(ClientMessage::Pause(decode_payload::<PauseMsg>(data)?)),
        MessageType::Seek => Ok(ClientMessage::Seek(decode_payload::<SeekMsg>(data)?)),
        MessageType::GetRoomState => Ok(ClientMessage::GetRoomState(decode_payload::<
            GetRoomStateMsg,
        >(data)?)),
        MessageType::Ping => Ok(ClientMessage::Ping(decode_payload::<PingMsg>(data)?)),
        other => Err(ProtocolError::UnexpectedMessageType(other)),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Ack => Ok(ServerMessage::Ack(decode_payload::<AckMsg>(data)?)),
        MessageType::Connected => Ok(ServerMessage::Connected(decode_payload::<ConnectedMsg>(
            data,
        )?)),
        MessageType::UserJoined => Ok(ServerMessage::UserJoined(decode_payload::<
            UserJoinedMsg,
        >(data)?)),
        MessageType::UserLeft => Ok(ServerMessage::UserLeft(decode_payload::<UserLeftMsg>(
            data,
        )?)),
        MessageType::HostChanged => Ok(ServerMessage::HostChanged(decode_payload::<
            HostChangedMsg,
        >(data)?)),
        MessageType::TrackChanged => Ok(ServerMessage::TrackChanged(decode_payload::<
            TrackChangedMsg,
        >(data)?)),
        MessageType::SyncPlay => Ok(ServerMessage::SyncPlay(decode_payload::<SyncPlayMsg>(
            data,
        )?)),
        MessageType::SyncPause => Ok(ServerMessage::SyncPause(decode_payload::<SyncPauseMsg>(
            data,
        )?)),
        MessageType::SyncSeek => Ok(ServerMessage::SyncSeek(decode_payload::<SyncSeekMsg>(
            data,
        )?)),
        MessageType::ServerShutdown => Ok(ServerMessage::ServerShutdown(decode_payload::<
            ServerShutdownMsg,
        >(data)?)),
        MessageType::Error => Ok(ServerMessage::Error(decode_payload::<ErrorMsg>(data)?)),
        other => Err(ProtocolError::UnexpectedMessageType(other)),
    }
}
