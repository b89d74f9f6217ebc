pub mod coordinator;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use syncbeats_client::actuator::PlayerEvents;
use syncbeats_client::{
    ActuationError, ClientConfig, JoinedRoom, PlaybackActuator, PlayerEvent, SessionEvent,
    SyncClient,
};
use syncbeats_core::net::messages::{AckMsg, ClientMessage, ConnectedMsg, ServerMessage};
use syncbeats_core::net::protocol::PROTOCOL_VERSION;
use syncbeats_core::room::RoomState;
use syncbeats_core::test_helpers::{ChannelConnector, ServerEnd, TokioClock};

/// Wall-clock origin for paused-time tests.
pub const EPOCH: u64 = 1_700_000_000_000;

/// Length reported for every loaded track.
pub const TRACK_SECS: f64 = 240.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load(String),
    Play,
    Pause,
    SetPosition(f64),
}

#[derive(Default)]
struct Recorded {
    calls: Vec<(Instant, Call)>,
    loaded: bool,
    position: f64,
    fail_play: bool,
    events: Option<PlayerEvents>,
}

/// Actuator that records every call with the instant it happened. Clones
/// share the same record, so a test can keep one after handing the other to
/// the client.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingActuator {
    pub fn calls(&self) -> Vec<Call> {
        self.timed_calls().into_iter().map(|(_, c)| c).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// When the first `play` happened, if any.
    pub fn played_at(&self) -> Option<Instant> {
        self.timed_calls()
            .into_iter()
            .find(|(_, c)| *c == Call::Play)
            .map(|(at, _)| at)
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn set_position(&self, secs: f64) {
        self.inner.lock().unwrap().position = secs;
    }

    /// Make `play` fail, e.g. an autoplay restriction.
    pub fn fail_play(&self, fail: bool) {
        self.inner.lock().unwrap().fail_play = fail;
    }

    /// Report an engine event as if the audio backend raised it.
    pub fn raise(&self, event: PlayerEvent) {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .as_ref()
            .expect("actuator not subscribed")
            .try_send(event)
            .unwrap();
    }

    fn record(&self, call: Call) {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push((Instant::now(), call));
    }
}

impl PlaybackActuator for RecordingActuator {
    fn subscribe(&mut self, events: PlayerEvents) {
        self.inner.lock().unwrap().events = Some(events);
    }

    fn load(&mut self, url: &str) -> Result<(), ActuationError> {
        self.record(Call::Load(url.to_string()));
        let mut inner = self.inner.lock().unwrap();
        inner.loaded = true;
        inner.position = 0.0;
        Ok(())
    }

    fn play(&mut self) -> Result<(), ActuationError> {
        if self.inner.lock().unwrap().fail_play {
            return Err(ActuationError::Playback("autoplay blocked".to_string()));
        }
        self.record(Call::Play);
        Ok(())
    }

    fn pause(&mut self) {
        self.record(Call::Pause);
    }

    fn position(&self) -> f64 {
        self.inner.lock().unwrap().position
    }

    fn set_position(&mut self, secs: f64) -> Result<(), ActuationError> {
        self.record(Call::SetPosition(secs));
        self.inner.lock().unwrap().position = secs;
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.inner.lock().unwrap().loaded.then_some(TRACK_SECS)
    }
}

/// A client wired to an in-memory server.
pub struct Harness {
    pub client: SyncClient,
    pub events: mpsc::Receiver<SessionEvent>,
    pub connector: ChannelConnector,
    pub accepted: mpsc::UnboundedReceiver<ServerEnd>,
    pub actuator: RecordingActuator,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let (connector, accepted) = ChannelConnector::new();
        let actuator = RecordingActuator::default();
        let (client, events) = SyncClient::start(
            config,
            connector.clone(),
            actuator.clone(),
            TokioClock::new(EPOCH),
        );
        Self {
            client,
            events,
            connector,
            accepted,
            actuator,
        }
    }

    /// Connect and greet the client as `session_id`.
    pub async fn connect_as(&mut self, session_id: &str) -> ServerEnd {
        self.client.connect().await.unwrap();
        let server = self.accept().await;
        greet(&server, session_id);
        server
    }

    /// The next connection the client opens.
    pub async fn accept(&mut self) -> ServerEnd {
        tokio::time::timeout(Duration::from_secs(30), self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Skip events until one matches.
    pub async fn wait_for(&mut self, matches: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let event = self.events.recv().await.expect("session stopped");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for session event")
    }

    /// Drop every event delivered so far.
    pub fn drain_events(&mut self) {
        while self.events.try_recv().is_ok() {}
    }
}

pub fn greet(server: &ServerEnd, session_id: &str) {
    server.send(&ServerMessage::Connected(ConnectedMsg {
        session_id: session_id.to_string(),
        version: PROTOCOL_VERSION.to_string(),
    }));
}

/// Join `state.room_code` as `local`, with the server acknowledging `state`.
pub async fn join_room(
    client: &SyncClient,
    server: &mut ServerEnd,
    state: RoomState,
    local: &str,
) -> JoinedRoom {
    let code = state.room_code.clone();
    let is_host = state.is_host(local);
    let (joined, ()) = tokio::join!(client.join_room(&code), async {
        match server.expect_request().await {
            ClientMessage::JoinRoom(m) => {
                assert_eq!(m.room_code, code);
                server.send(&ServerMessage::Ack(
                    AckMsg::ok(m.request_id).with_room(state, is_host),
                ));
            },
            other => panic!("Expected join-room, got: {other:?}"),
        }
    });
    joined.unwrap()
}

/// Acknowledge the next request, which must be of the kind `check` accepts.
pub async fn ack_next(server: &mut ServerEnd, check: impl Fn(&ClientMessage) -> bool) {
    let request = server.expect_request().await;
    assert!(check(&request), "Unexpected request: {request:?}");
    server.send(&ServerMessage::Ack(AckMsg::ok(request.request_id())));
}
