//! The session task: one owned value holding connection, room and playback
//! state, driven by a single `select!` loop. Nothing here is shared, so no
//! locks are needed and a firing timer never observes a half-applied update.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use syncbeats_core::net::messages::{
    AckMsg, ClientMessage, CreateRoomMsg, GetRoomStateMsg, JoinRoomMsg, LeaveRoomMsg, MessageType,
    PauseMsg, PingMsg, PlayMsg, RequestId, SeekMsg, ServerMessage, SetTrackMsg,
};
use syncbeats_core::net::protocol::{PROTOCOL_VERSION, ProtocolError};
use syncbeats_core::net::transport::{Connector, TransportError};
use syncbeats_core::room::{RoomState, Track, UserId};
use syncbeats_core::sync::SyncCommand;
use syncbeats_core::time::Clock;

use crate::actuator::{MediaError, PLAYER_EVENT_CAPACITY, PlaybackActuator, PlayerEvent};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::error::{ActuationError, Rejection, SyncError};
use crate::lifecycle::{RoomLifecycle, late_join_command, resync_command};
use crate::reconciler::{Role, RoleTransition, RoomReconciler};
use crate::requests::PendingRequests;
use crate::role_gate::{CommandKind, RoleGate};
use crate::scheduler::{Scheduled, SyncScheduler};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// Room membership confirmed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRoom {
    pub room_code: String,
    pub is_host: bool,
    pub room_state: RoomState,
}

/// Notifications for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    Reconnected { attempts: u32 },
    /// The server assigned this connection its id.
    Connected { session_id: UserId },
    RoomJoined { room_code: String, is_host: bool },
    RoomLeft,
    RoomUpdated(RoomState),
    UserJoined(UserId),
    UserLeft(UserId),
    RoleChanged(RoleTransition),
    TrackChanged(Track),
    /// Local transport state after an actuation.
    PlaybackChanged { is_playing: bool, position: f64 },
    /// Heartbeat round trip.
    Latency(Duration),
    MediaError(MediaError),
    ServerShutdown,
    ServerError(String),
    Error(SyncError),
}

/// Point-in-time view of the session for display and debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub local_id: Option<UserId>,
    pub room_code: Option<String>,
    pub role: Role,
    pub room: Option<RoomState>,
    pub is_playing: bool,
    pub position: f64,
    pub pending_sync: bool,
}

pub(crate) enum Command {
    Connect(Reply<()>),
    Disconnect(Reply<()>),
    CreateRoom(Reply<JoinedRoom>),
    JoinRoom(String, Reply<JoinedRoom>),
    LeaveRoom(Reply<()>),
    RefreshRoomState(Reply<RoomState>),
    SetTrack(Track, Reply<()>),
    Play(Reply<()>),
    Pause(Reply<()>),
    TogglePlay(Reply<()>),
    Seek(f64, Reply<()>),
    NextTrack(Reply<()>),
    PreviousTrack(Reply<()>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// What to do once a request resolves.
enum Purpose {
    /// `create-room` or `join-room` from the caller.
    Enter(Reply<JoinedRoom>),
    Leave(Reply<()>),
    Control(Reply<()>),
    /// `get-room-state`, from the caller or after a reconnect.
    Refresh(Option<Reply<RoomState>>),
    /// Automatic `join-room` for the cached room after a reconnect.
    Rejoin,
    Heartbeat { sent_at: u64 },
    /// `pause` sent by the host when its track ended.
    FollowEnd,
}

pub(crate) struct Session<C: Connector, A: PlaybackActuator, K: Clock> {
    config: ClientConfig,
    clock: K,
    connection: ConnectionManager<C>,
    reconciler: RoomReconciler,
    gate: RoleGate,
    lifecycle: RoomLifecycle,
    scheduler: SyncScheduler,
    actuator: A,
    requests: PendingRequests<Purpose>,
    connect_waiters: Vec<Reply<()>>,
    commands: mpsc::Receiver<Command>,
    player_events: mpsc::Receiver<PlayerEvent>,
    events: mpsc::Sender<SessionEvent>,
    reported_state: ConnectionState,
}

impl<C: Connector, A: PlaybackActuator, K: Clock> Session<C, A, K> {
    pub(crate) fn new(
        config: ClientConfig,
        connector: C,
        mut actuator: A,
        clock: K,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (player_tx, player_events) = mpsc::channel(PLAYER_EVENT_CAPACITY);
        actuator.subscribe(player_tx);
        let connection = ConnectionManager::new(connector, &config);
        Self {
            config,
            clock,
            connection,
            reconciler: RoomReconciler::new(),
            gate: RoleGate::default(),
            lifecycle: RoomLifecycle::new(),
            scheduler: SyncScheduler::new(),
            actuator,
            requests: PendingRequests::new(),
            connect_waiters: Vec::new(),
            commands,
            player_events,
            events,
            reported_state: ConnectionState::Disconnected,
        }
    }

    pub(crate) fn connection_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("Session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    },
                    None => {
                        self.disconnect().await;
                        break;
                    },
                },
                event = self.connection.next_event() => self.handle_connection_event(event).await,
                command = self.scheduler.next_due() => self.fire(command),
                () = self.requests.next_expiry() => self.expire_requests().await,
                Some(event) = self.player_events.recv() => self.handle_player_event(event).await,
            }
            self.report_connection_state();
        }
        tracing::debug!("Session stopped");
    }

    // ------------------------------------------------------------------
    // Handle commands
    // ------------------------------------------------------------------

    /// Returns `false` once the session should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => {
                if self.connection.state().is_connected() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.connect_waiters.push(reply);
                    self.connection.connect();
                }
            },
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(Ok(()));
            },
            Command::CreateRoom(reply) => {
                if let Err(r) = self.lifecycle.begin_create() {
                    reject(reply, r);
                    return true;
                }
                self.send_request(Purpose::Enter(reply), |request_id| {
                    ClientMessage::CreateRoom(CreateRoomMsg { request_id })
                })
                .await;
            },
            Command::JoinRoom(raw, reply) => {
                let room_code = match self.lifecycle.begin_join(&raw) {
                    Ok(code) => code,
                    Err(r) => {
                        reject(reply, r);
                        return true;
                    },
                };
                self.send_request(Purpose::Enter(reply), |request_id| {
                    ClientMessage::JoinRoom(JoinRoomMsg {
                        request_id,
                        room_code,
                    })
                })
                .await;
            },
            Command::LeaveRoom(reply) => {
                if let Err(r) = self.lifecycle.require_room() {
                    reject(reply, r);
                    return true;
                }
                if !self.connection.state().is_connected() {
                    // The server dropped us along with the connection.
                    self.leave_locally();
                    let _ = reply.send(Ok(()));
                    return true;
                }
                self.send_request(Purpose::Leave(reply), |request_id| {
                    ClientMessage::LeaveRoom(LeaveRoomMsg { request_id })
                })
                .await;
            },
            Command::RefreshRoomState(reply) => {
                if let Err(r) = self.lifecycle.require_room() {
                    reject(reply, r);
                    return true;
                }
                self.send_request(Purpose::Refresh(Some(reply)), |request_id| {
                    ClientMessage::GetRoomState(GetRoomStateMsg { request_id })
                })
                .await;
            },
            Command::SetTrack(track, reply) => {
                if let Err(r) = self.gate.authorize(CommandKind::SetTrack) {
                    reject(reply, r);
                    return true;
                }
                self.send_request(Purpose::Control(reply), |request_id| {
                    ClientMessage::SetTrack(SetTrackMsg { request_id, track })
                })
                .await;
            },
            Command::Play(reply) => self.request_play(reply).await,
            Command::Pause(reply) => self.request_pause(reply).await,
            Command::TogglePlay(reply) => {
                if self.scheduler.is_playing() {
                    self.request_pause(reply).await;
                } else {
                    self.request_play(reply).await;
                }
            },
            Command::Seek(position, reply) => self.request_seek(position, reply).await,
            Command::NextTrack(reply) => reject(reply, self.navigate(CommandKind::NextTrack)),
            Command::PreviousTrack(reply) => {
                reject(reply, self.navigate(CommandKind::PreviousTrack));
            },
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            },
            Command::Shutdown(done) => {
                self.disconnect().await;
                let _ = done.send(());
                return false;
            },
        }
        true
    }

    fn transport_preflight(&self, kind: CommandKind) -> Result<(), Rejection> {
        if !self.scheduler.has_track() {
            return Err(Rejection::NoTrack);
        }
        self.gate.authorize(kind)
    }

    async fn request_play(&mut self, reply: Reply<()>) {
        if let Err(r) = self.transport_preflight(CommandKind::Play) {
            reject(reply, r);
            return;
        }
        let position_offset = self.actuator.position();
        self.send_request(Purpose::Control(reply), |request_id| {
            ClientMessage::Play(PlayMsg {
                request_id,
                position_offset,
            })
        })
        .await;
    }

    async fn request_pause(&mut self, reply: Reply<()>) {
        if let Err(r) = self.transport_preflight(CommandKind::Pause) {
            reject(reply, r);
            return;
        }
        self.send_request(Purpose::Control(reply), |request_id| {
            ClientMessage::Pause(PauseMsg { request_id })
        })
        .await;
    }

    async fn request_seek(&mut self, position: f64, reply: Reply<()>) {
        let Some(duration) = self.actuator.duration().filter(|d| *d > 0.0) else {
            reject(reply, Rejection::NotReady);
            return;
        };
        if let Err(r) = self.gate.authorize(CommandKind::Seek) {
            reject(reply, r);
            return;
        }
        if !position.is_finite() {
            let _ = reply.send(Err(ActuationError::InvalidPosition(position).into()));
            return;
        }
        let position_offset = position.clamp(0.0, duration);
        self.send_request(Purpose::Control(reply), |request_id| {
            ClientMessage::Seek(SeekMsg {
                request_id,
                position_offset,
            })
        })
        .await;
    }

    /// Track navigation has no server command yet.
    fn navigate(&self, kind: CommandKind) -> Rejection {
        match self.gate.authorize(kind) {
            Ok(()) => Rejection::Unsupported(kind),
            Err(r) => r,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection.state(),
            local_id: self.reconciler.local_id().map(str::to_string),
            room_code: self.lifecycle.room_code().map(str::to_string),
            role: self.reconciler.role(),
            room: self.reconciler.state().cloned(),
            is_playing: self.scheduler.is_playing(),
            position: self.actuator.position(),
            pending_sync: self.scheduler.has_pending(),
        }
    }

    async fn disconnect(&mut self) {
        self.connection.disconnect().await;
        self.fail_all(TransportError::ConnectionLost(
            "disconnected by client".to_string(),
        ));
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(TransportError::NotConnected.into()));
        }
        if self.lifecycle.in_room() {
            self.leave_locally();
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    async fn send_request(
        &mut self,
        purpose: Purpose,
        build: impl FnOnce(RequestId) -> ClientMessage,
    ) {
        let id = self.requests.next_id();
        let msg = build(id);
        let kind = msg.message_type();
        match self.connection.send(&msg).await {
            Ok(()) => {
                let deadline = Instant::now() + self.config.request_timeout();
                self.requests.insert(id, kind, deadline, purpose);
            },
            Err(e) => self.fail_request(kind, purpose, e),
        }
    }

    fn fail_request(&mut self, kind: MessageType, purpose: Purpose, err: SyncError) {
        match purpose {
            Purpose::Enter(reply) => {
                self.lifecycle.entry_failed();
                let _ = reply.send(Err(err));
            },
            Purpose::Leave(reply) | Purpose::Control(reply) => {
                let _ = reply.send(Err(err));
            },
            Purpose::Refresh(Some(reply)) => {
                let _ = reply.send(Err(err));
            },
            Purpose::Refresh(None) | Purpose::Rejoin => {
                tracing::warn!(%kind, error = %err, "Room resync did not complete");
            },
            Purpose::Heartbeat { .. } => {
                if matches!(err, SyncError::TimedOut { .. }) {
                    tracing::warn!("Heartbeat missed");
                } else {
                    tracing::debug!(error = %err, "Heartbeat not sent");
                }
            },
            Purpose::FollowEnd => {
                tracing::debug!(error = %err, "Pause after track end not delivered");
            },
        }
    }

    fn fail_all(&mut self, error: TransportError) {
        for (kind, purpose) in self.requests.drain() {
            self.fail_request(kind, purpose, error.clone().into());
        }
    }

    async fn expire_requests(&mut self) {
        for (kind, purpose) in self.requests.take_expired(Instant::now()) {
            if !matches!(purpose, Purpose::Heartbeat { .. }) {
                tracing::warn!(%kind, "Request timed out");
            }
            match purpose {
                // The cached snapshot cannot be trusted without an answer.
                Purpose::Refresh(None) => self.rejoin().await,
                Purpose::Rejoin => self.abandon_room(SyncError::TimedOut { request: kind }),
                other => self.fail_request(kind, other, SyncError::TimedOut { request: kind }),
            }
        }
    }

    async fn handle_ack(&mut self, ack: AckMsg) {
        let Some((kind, purpose)) = self.requests.resolve(ack.request_id) else {
            tracing::debug!(id = ack.request_id, "Ack for unknown or expired request");
            return;
        };

        if !ack.success {
            let message = ack.error.unwrap_or_else(|| format!("{kind} failed"));
            tracing::warn!(%kind, error = %message, "Request rejected by server");
            match purpose {
                Purpose::Rejoin => self.abandon_room(Rejection::Server(message).into()),
                Purpose::Refresh(reply) => {
                    if let Some(reply) = reply {
                        reject(reply, Rejection::Server(message));
                    }
                    self.rejoin().await;
                },
                other => self.fail_request(kind, other, Rejection::Server(message).into()),
            }
            return;
        }

        match purpose {
            Purpose::Enter(reply) => {
                let result = self.enter_room(ack, false);
                let _ = reply.send(result);
            },
            Purpose::Leave(reply) => {
                self.leave_locally();
                let _ = reply.send(Ok(()));
            },
            Purpose::Control(reply) => {
                let _ = reply.send(Ok(()));
            },
            Purpose::Refresh(reply) => self.refreshed(ack, reply).await,
            Purpose::Rejoin => {
                if let Err(e) = self.enter_room(ack, true) {
                    self.abandon_room(e);
                }
            },
            Purpose::Heartbeat { sent_at } => {
                let echoed = ack.timestamp.unwrap_or(sent_at);
                let rtt = Duration::from_millis(self.clock.now_millis().saturating_sub(echoed));
                tracing::debug!(rtt_ms = rtt.as_millis() as u64, "Heartbeat");
                self.emit(SessionEvent::Latency(rtt));
            },
            Purpose::FollowEnd => {},
        }
    }

    // ------------------------------------------------------------------
    // Room lifecycle
    // ------------------------------------------------------------------

    /// Install the room from a create/join acknowledgement. `resume` is set
    /// when re-entering after a reconnect, where local playback may already
    /// be running.
    fn enter_room(&mut self, ack: AckMsg, resume: bool) -> Result<JoinedRoom, SyncError> {
        let Some(state) = ack.room_state else {
            self.lifecycle.entry_failed();
            return Err(ProtocolError::InvalidRoomState(
                "acknowledgement carried no room state".to_string(),
            )
            .into());
        };
        if let Err(e) = state.validate() {
            self.lifecycle.entry_failed();
            return Err(ProtocolError::from(e).into());
        }
        let room_code = ack.room_code.unwrap_or_else(|| state.room_code.clone());
        self.lifecycle.entered(room_code.clone());
        self.install_snapshot(state.clone());

        if let Some(track) = &state.current_track {
            self.load_track(track);
        }
        let now = self.clock.now_millis();
        let sync = if resume {
            resync_command(&state, self.scheduler.is_playing(), now)
        } else {
            late_join_command(&state, now)
        };
        if let Some(command) = sync {
            tracing::info!(
                position = state.current_time,
                "Room already playing, syncing to server position"
            );
            self.schedule_sync(command);
        }

        let is_host = self.reconciler.is_host();
        if ack.is_host.is_some_and(|flag| flag != is_host) {
            tracing::warn!(
                ack = ?ack.is_host,
                snapshot = is_host,
                "Host flag disagrees with snapshot, trusting snapshot"
            );
        }
        self.emit(SessionEvent::RoomJoined {
            room_code: room_code.clone(),
            is_host,
        });
        Ok(JoinedRoom {
            room_code,
            is_host,
            room_state: state,
        })
    }

    /// Ask for the authoritative snapshot after a reconnect.
    async fn resync_room(&mut self) {
        tracing::info!("Refreshing room state after reconnect");
        self.send_request(Purpose::Refresh(None), |request_id| {
            ClientMessage::GetRoomState(GetRoomStateMsg { request_id })
        })
        .await;
    }

    async fn refreshed(&mut self, ack: AckMsg, reply: Option<Reply<RoomState>>) {
        let member = match (&ack.room_state, self.reconciler.local_id()) {
            (Some(state), Some(id)) => state.contains(id),
            _ => false,
        };
        let Some(state) = ack.room_state.filter(|_| member) else {
            tracing::info!("Not a member of the cached room anymore");
            if let Some(reply) = reply {
                reject(reply, Rejection::NotInRoom);
            }
            self.rejoin().await;
            return;
        };
        if !self.install_snapshot(state.clone()) {
            if let Some(reply) = reply {
                let _ = reply.send(Err(ProtocolError::InvalidRoomState(
                    "refreshed snapshot failed validation".to_string(),
                )
                .into()));
            }
            return;
        }
        if let Some(track) = &state.current_track {
            self.load_track(track);
        }
        let now = self.clock.now_millis();
        if let Some(command) = resync_command(&state, self.scheduler.is_playing(), now) {
            self.schedule_sync(command);
        }
        if let Some(reply) = reply {
            let _ = reply.send(Ok(state));
        }
    }

    async fn rejoin(&mut self) {
        let Some(room_code) = self.lifecycle.room_code().map(str::to_string) else {
            return;
        };
        tracing::info!(room = %room_code, "Rejoining room");
        self.send_request(Purpose::Rejoin, |request_id| {
            ClientMessage::JoinRoom(JoinRoomMsg {
                request_id,
                room_code,
            })
        })
        .await;
    }

    fn leave_locally(&mut self) {
        self.scheduler.unload(&mut self.actuator);
        self.reconciler.clear();
        self.lifecycle.reset();
        self.gate.set_host(false);
        self.emit(SessionEvent::RoomLeft);
    }

    /// The cached room could not be re-entered.
    fn abandon_room(&mut self, error: SyncError) {
        tracing::warn!(%error, "Could not get back into room");
        self.leave_locally();
        self.emit(SessionEvent::Error(error));
    }

    // ------------------------------------------------------------------
    // Connection and server events
    // ------------------------------------------------------------------

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { after_attempts } => {
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                if let Some(attempts) = after_attempts {
                    self.emit(SessionEvent::Reconnected { attempts });
                }
            },
            ConnectionEvent::Frame(msg) => self.handle_server_message(msg).await,
            ConnectionEvent::Malformed(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
            },
            ConnectionEvent::Lost { reason } => {
                self.fail_all(TransportError::ConnectionLost(reason));
                self.reconciler.mark_stale();
            },
            ConnectionEvent::ConnectFailed(error) => {
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone().into()));
                }
            },
            ConnectionEvent::HeartbeatDue => {
                let sent_at = self.clock.now_millis();
                self.send_request(Purpose::Heartbeat { sent_at }, |request_id| {
                    ClientMessage::Ping(PingMsg {
                        request_id,
                        timestamp: sent_at,
                    })
                })
                .await;
            },
        }
    }

    async fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Ack(ack) => self.handle_ack(ack).await,
            ServerMessage::Connected(hello) => {
                tracing::info!(
                    session_id = %hello.session_id,
                    version = %hello.version,
                    "Session established"
                );
                if hello.version != PROTOCOL_VERSION {
                    tracing::warn!(
                        server = %hello.version,
                        client = PROTOCOL_VERSION,
                        "Protocol version mismatch"
                    );
                }
                self.reconciler.set_local_id(hello.session_id.clone());
                self.gate.set_host(self.reconciler.is_host());
                self.emit(SessionEvent::Connected {
                    session_id: hello.session_id,
                });
                if self.lifecycle.in_room() && self.reconciler.is_stale() {
                    self.resync_room().await;
                }
            },
            ServerMessage::ServerShutdown(_) => {
                tracing::warn!("Server is shutting down");
                self.emit(SessionEvent::ServerShutdown);
            },
            ServerMessage::Error(err) => {
                tracing::warn!(message = %err.message, "Server error");
                self.emit(SessionEvent::ServerError(err.message));
            },
            room_event => self.handle_room_event(room_event),
        }
    }

    fn handle_room_event(&mut self, msg: ServerMessage) {
        let kind = msg.message_type();
        let ours = msg
            .room_state()
            .is_some_and(|s| Some(s.room_code.as_str()) == self.lifecycle.room_code());
        if !ours {
            tracing::debug!(%kind, "Ignoring event for a room we are not in");
            return;
        }
        let command = msg.sync_command();

        match msg {
            ServerMessage::UserJoined(m) => {
                if self.install_snapshot(m.room_state) {
                    tracing::info!(user = %m.user_id, "User joined");
                    self.emit(SessionEvent::UserJoined(m.user_id));
                }
            },
            ServerMessage::UserLeft(m) => {
                if self.install_snapshot(m.room_state) {
                    tracing::info!(user = %m.user_id, "User left");
                    self.emit(SessionEvent::UserLeft(m.user_id));
                }
            },
            ServerMessage::HostChanged(m) => {
                if self.install_snapshot(m.room_state) {
                    tracing::info!(host = %m.new_host_id, "Host changed");
                }
            },
            ServerMessage::TrackChanged(m) => {
                if self.install_snapshot(m.room_state) {
                    self.load_track(&m.track);
                }
            },
            ServerMessage::SyncPlay(m) => {
                if self.install_snapshot(m.room_state)
                    && let Some(command) = command
                {
                    self.schedule_sync(command);
                }
            },
            ServerMessage::SyncPause(m) => {
                if self.install_snapshot(m.room_state)
                    && let Some(command) = command
                {
                    self.schedule_sync(command);
                }
            },
            ServerMessage::SyncSeek(m) => {
                if self.install_snapshot(m.room_state)
                    && let Some(command) = command
                {
                    self.schedule_sync(command);
                }
            },
            other => tracing::debug!(kind = %other.message_type(), "Unhandled room event"),
        }
    }

    /// Replace the cached snapshot and update the role gate. Returns `false`
    /// when the snapshot was invalid and the event must be dropped.
    fn install_snapshot(&mut self, state: RoomState) -> bool {
        match self.reconciler.apply(state) {
            Ok(previous) => {
                let current = self.reconciler.role();
                self.gate.set_host(current == Role::Host);
                let transition = RoleTransition::between(previous, current);
                if transition != RoleTransition::Unchanged {
                    tracing::info!(?transition, "Role changed");
                    self.emit(SessionEvent::RoleChanged(transition));
                }
                if let Some(state) = self.reconciler.state() {
                    self.emit(SessionEvent::RoomUpdated(state.clone()));
                }
                true
            },
            Err(e) => {
                tracing::warn!(error = %e, "Dropping invalid room snapshot");
                false
            },
        }
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    fn load_track(&mut self, track: &Track) {
        match self.scheduler.load(track, &mut self.actuator) {
            Ok(true) => self.emit(SessionEvent::TrackChanged(track.clone())),
            Ok(false) => {},
            Err(e) => {
                tracing::warn!(url = %track.url, error = %e, "Failed to load track");
                self.emit(SessionEvent::Error(e.into()));
            },
        }
    }

    fn schedule_sync(&mut self, command: SyncCommand) {
        let now = self.clock.now_millis();
        match self.scheduler.schedule(command, now, &mut self.actuator) {
            Ok(Scheduled::Applied) => self.emit_playback(),
            Ok(Scheduled::Armed { .. } | Scheduled::Ignored) => {},
            Err(e) => self.actuation_failed(command, e),
        }
    }

    fn fire(&mut self, command: SyncCommand) {
        match self.scheduler.apply(command, &mut self.actuator) {
            Ok(()) => self.emit_playback(),
            Err(e) => self.actuation_failed(command, e),
        }
    }

    fn actuation_failed(&self, command: SyncCommand, error: ActuationError) {
        tracing::warn!(command = command.name(), error = %error, "Actuation failed");
        self.emit(SessionEvent::Error(error.into()));
    }

    fn emit_playback(&self) {
        self.emit(SessionEvent::PlaybackChanged {
            is_playing: self.scheduler.is_playing(),
            position: self.actuator.position(),
        });
    }

    async fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Ended => {
                tracing::info!("Track ended");
                self.scheduler.set_playing(false);
                self.emit_playback();
                if self.gate.is_host() && self.connection.state().is_connected() {
                    self.send_request(Purpose::FollowEnd, |request_id| {
                        ClientMessage::Pause(PauseMsg { request_id })
                    })
                    .await;
                }
            },
            PlayerEvent::Error(e) => {
                tracing::warn!(error = %e, "Playback engine error");
                self.scheduler.set_playing(false);
                self.emit(SessionEvent::MediaError(e));
            },
            other => tracing::trace!(event = ?other, "Player event"),
        }
    }

    // ------------------------------------------------------------------
    // Event delivery
    // ------------------------------------------------------------------

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {},
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "Event channel full, dropping event");
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }

    fn report_connection_state(&mut self) {
        let state = self.connection.state();
        if state == self.reported_state {
            return;
        }
        self.reported_state = state;
        if state == ConnectionState::Failed {
            tracing::warn!("Connection failed, waiting for an explicit connect");
        }
        // A dropped event is still visible through the watch channel.
        self.emit(SessionEvent::ConnectionChanged(state));
    }
}

fn reject<T>(reply: Reply<T>, rejection: Rejection) {
    let _ = reply.send(Err(rejection.into()));
}
