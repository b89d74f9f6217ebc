use serde::{Deserialize, Serialize};

/// Server-assigned identifier of a connected client.
pub type UserId = String;

/// Shortest room code accepted by `join-room`.
pub const MIN_ROOM_CODE_LEN: usize = 3;

/// Longest room code accepted by `join-room`.
pub const MAX_ROOM_CODE_LEN: usize = 20;

/// Where a track's audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Upload,
    Stream,
}

/// A playable track shared by every member of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub size: Option<u64>,
    pub uploaded_at: Option<u64>,
}

impl Track {
    /// A streamed track with no upload metadata.
    pub fn stream(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            kind: TrackKind::Stream,
            size: None,
            uploaded_at: None,
        }
    }
}

/// Authoritative snapshot of a room, pushed by the server with every
/// room-changing event. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub room_code: String,
    pub host_id: UserId,
    pub users: Vec<UserId>,
    pub user_count: u32,
    pub current_track: Option<Track>,
    pub is_playing: bool,
    /// Server-reported playback position in seconds.
    pub current_time: f64,
    /// Room creation time, ms since the Unix epoch.
    pub created_at: u64,
}

impl RoomState {
    /// Check the snapshot's internal consistency.
    pub fn validate(&self) -> Result<(), RoomStateError> {
        let actual = self.users.len();
        if self.user_count as usize != actual {
            return Err(RoomStateError::UserCountMismatch {
                declared: self.user_count,
                actual,
            });
        }
        for (i, id) in self.users.iter().enumerate() {
            if self.users[..i].contains(id) {
                return Err(RoomStateError::DuplicateMember(id.clone()));
            }
        }
        Ok(())
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomStateError {
    UserCountMismatch { declared: u32, actual: usize },
    DuplicateMember(UserId),
}

impl std::fmt::Display for RoomStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserCountMismatch { declared, actual } => write!(
                f,
                "user count mismatch: snapshot declares {declared}, lists {actual}"
            ),
            Self::DuplicateMember(id) => write!(f, "duplicate member in snapshot: {id}"),
        }
    }
}

impl std::error::Error for RoomStateError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCodeError {
    Empty,
    Length(usize),
    InvalidCharacter(char),
}

impl std::fmt::Display for RoomCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "room code is empty"),
            Self::Length(len) => write!(
                f,
                "room code must be {MIN_ROOM_CODE_LEN}-{MAX_ROOM_CODE_LEN} characters long (got {len})"
            ),
            Self::InvalidCharacter(c) => write!(f, "room code contains invalid character {c:?}"),
        }
    }
}

impl std::error::Error for RoomCodeError {}

/// Trim and uppercase a user-entered room code, then check its shape.
pub fn normalize_room_code(raw: &str) -> Result<String, RoomCodeError> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(RoomCodeError::Empty);
    }
    if let Some(c) = code.chars().find(|c| c.is_control() || c.is_whitespace()) {
        return Err(RoomCodeError::InvalidCharacter(c));
    }
    let len = code.chars().count();
    if !(MIN_ROOM_CODE_LEN..=MAX_ROOM_CODE_LEN).contains(&len) {
        return Err(RoomCodeError::Length(len));
    }
    Ok(code)
}
