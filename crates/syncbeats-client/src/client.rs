use tokio::sync::{mpsc, oneshot, watch};

use syncbeats_core::net::transport::Connector;
use syncbeats_core::room::{RoomState, Track};
use syncbeats_core::time::Clock;

use crate::actuator::PlaybackActuator;
use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::error::SyncError;
use crate::session::{Command, JoinedRoom, Session, SessionEvent, SessionSnapshot};

const COMMAND_CAPACITY: usize = 32;

/// Handle to a running sync session. Cheap to clone; every clone drives the
/// same session. The session stops when [`SyncClient::shutdown`] is called or
/// the last handle is dropped.
#[derive(Clone)]
pub struct SyncClient {
    commands: mpsc::Sender<Command>,
    connection: watch::Receiver<ConnectionState>,
}

impl SyncClient {
    /// Spawn the session task. Returns the handle and the stream of
    /// [`SessionEvent`]s. Nothing connects until [`SyncClient::connect`].
    pub fn start<C, A, K>(
        config: ClientConfig,
        connector: C,
        actuator: A,
        clock: K,
    ) -> (Self, mpsc::Receiver<SessionEvent>)
    where
        C: Connector,
        A: PlaybackActuator,
        K: Clock,
    {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, events) = mpsc::channel(config.event_channel_capacity.max(1));
        let session = Session::new(config, connector, actuator, clock, command_rx, event_tx);
        let connection = session.connection_state();
        tokio::spawn(session.run());
        (
            Self {
                commands,
                connection,
            },
            events,
        )
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, SyncError>>) -> Command,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Open the connection. Resolves once connected, or with the error of the
    /// first failed attempt.
    pub async fn connect(&self) -> Result<(), SyncError> {
        self.request(Command::Connect).await
    }

    /// Close the connection and forget the room. No reconnect follows.
    pub async fn disconnect(&self) -> Result<(), SyncError> {
        self.request(Command::Disconnect).await
    }

    /// Create a room; the caller becomes its host.
    pub async fn create_room(&self) -> Result<JoinedRoom, SyncError> {
        self.request(Command::CreateRoom).await
    }

    /// Join by code. The code is trimmed and upper-cased first.
    pub async fn join_room(&self, room_code: &str) -> Result<JoinedRoom, SyncError> {
        let room_code = room_code.to_string();
        self.request(|reply| Command::JoinRoom(room_code, reply)).await
    }

    pub async fn leave_room(&self) -> Result<(), SyncError> {
        self.request(Command::LeaveRoom).await
    }

    /// Fetch the authoritative snapshot for the current room.
    pub async fn refresh_room_state(&self) -> Result<RoomState, SyncError> {
        self.request(Command::RefreshRoomState).await
    }

    pub async fn set_track(&self, track: Track) -> Result<(), SyncError> {
        self.request(|reply| Command::SetTrack(track, reply)).await
    }

    /// Ask the server to start the room from the local position.
    pub async fn play(&self) -> Result<(), SyncError> {
        self.request(Command::Play).await
    }

    pub async fn pause(&self) -> Result<(), SyncError> {
        self.request(Command::Pause).await
    }

    pub async fn toggle_play(&self) -> Result<(), SyncError> {
        self.request(Command::TogglePlay).await
    }

    /// Seek the room to `position` seconds, clamped to the track length.
    pub async fn seek(&self, position: f64) -> Result<(), SyncError> {
        self.request(|reply| Command::Seek(position, reply)).await
    }

    pub async fn next_track(&self) -> Result<(), SyncError> {
        self.request(Command::NextTrack).await
    }

    pub async fn previous_track(&self) -> Result<(), SyncError> {
        self.request(Command::PreviousTrack).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Follow connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Disconnect and stop the session task. Later calls on any handle
    /// return [`SyncError::SessionClosed`].
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}
