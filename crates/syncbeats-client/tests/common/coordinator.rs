//! Minimal coordinating server over axum WebSockets for end-to-end tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use syncbeats_core::net::messages::{
    AckMsg, ClientMessage, ConnectedMsg, ServerMessage, SyncPauseMsg, SyncPlayMsg, SyncSeekMsg,
    TrackChangedMsg, UserJoinedMsg, UserLeftMsg,
};
use syncbeats_core::net::protocol::{
    PROTOCOL_VERSION, decode_client_message, encode_server_message,
};
use syncbeats_core::room::{RoomState, UserId};
use syncbeats_core::time::now_millis;

/// Lead time added to every sync command.
pub const ACTIVATION_LEAD_MS: u64 = 500;

type Outbox = mpsc::UnboundedSender<Vec<u8>>;

struct Room {
    state: RoomState,
    members: HashMap<UserId, Outbox>,
}

#[derive(Clone, Default)]
struct Coordinator {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/ws", axum::routing::get(ws_handler))
            .with_state(Coordinator::default());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            _handle: handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(coordinator): State<Coordinator>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator))
}

async fn handle_socket(socket: WebSocket, coordinator: Coordinator) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Binary(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let session_id = uuid::Uuid::new_v4().to_string();
    send(
        &outbox,
        &ServerMessage::Connected(ConnectedMsg {
            session_id: session_id.clone(),
            version: PROTOCOL_VERSION.to_string(),
        }),
    );

    let mut joined: Option<String> = None;
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let Message::Binary(data) = msg else {
            continue;
        };
        let Ok(request) = decode_client_message(&data) else {
            continue;
        };
        coordinator.handle(&session_id, &outbox, &mut joined, request);
    }

    if let Some(code) = joined {
        coordinator.remove_member(&code, &session_id);
    }
    writer.abort();
}

fn send(outbox: &Outbox, msg: &ServerMessage) {
    let _ = outbox.send(encode_server_message(msg).unwrap());
}

fn broadcast(room: &Room, msg: &ServerMessage) {
    for outbox in room.members.values() {
        send(outbox, msg);
    }
}

impl Coordinator {
    fn handle(
        &self,
        session_id: &str,
        outbox: &Outbox,
        joined: &mut Option<String>,
        request: ClientMessage,
    ) {
        let id = request.request_id();
        let mut rooms = self.rooms.lock().unwrap();

        if let ClientMessage::Ping(ping) = &request {
            let mut ack = AckMsg::ok(id);
            ack.timestamp = Some(ping.timestamp);
            send(outbox, &ServerMessage::Ack(ack));
            return;
        }

        if let ClientMessage::CreateRoom(_) = request {
            let room_code = generate_room_code();
            let state = RoomState {
                room_code: room_code.clone(),
                host_id: session_id.to_string(),
                users: vec![session_id.to_string()],
                user_count: 1,
                current_track: None,
                is_playing: false,
                current_time: 0.0,
                created_at: now_millis(),
            };
            let mut members = HashMap::new();
            members.insert(session_id.to_string(), outbox.clone());
            rooms.insert(room_code.clone(), Room {
                state: state.clone(),
                members,
            });
            *joined = Some(room_code);
            send(outbox, &ServerMessage::Ack(AckMsg::ok(id).with_room(state, true)));
            return;
        }

        if let ClientMessage::JoinRoom(join) = &request {
            let Some(room) = rooms.get_mut(&join.room_code) else {
                send(outbox, &ServerMessage::Ack(AckMsg::rejected(id, "Room not found")));
                return;
            };
            room.state.users.push(session_id.to_string());
            room.state.user_count = room.state.users.len() as u32;
            broadcast(
                room,
                &ServerMessage::UserJoined(UserJoinedMsg {
                    user_id: session_id.to_string(),
                    room_state: room.state.clone(),
                }),
            );
            room.members.insert(session_id.to_string(), outbox.clone());
            *joined = Some(join.room_code.clone());
            send(
                outbox,
                &ServerMessage::Ack(AckMsg::ok(id).with_room(room.state.clone(), false)),
            );
            return;
        }

        let room = match joined.as_ref() {
            Some(code) => rooms.get_mut(code),
            None => None,
        };
        let Some(room) = room else {
            send(outbox, &ServerMessage::Ack(AckMsg::rejected(id, "Not in a room")));
            return;
        };
        let is_host = room.state.is_host(session_id);

        match request {
            ClientMessage::LeaveRoom(_) => {
                drop(rooms);
                if let Some(code) = joined.take() {
                    self.remove_member(&code, session_id);
                }
                send(outbox, &ServerMessage::Ack(AckMsg::ok(id)));
            },
            ClientMessage::GetRoomState(_) => {
                send(
                    outbox,
                    &ServerMessage::Ack(AckMsg::ok(id).with_room(room.state.clone(), is_host)),
                );
            },
            _ if !is_host => {
                send(
                    outbox,
                    &ServerMessage::Ack(AckMsg::rejected(id, "Only the host can control playback")),
                );
            },
            ClientMessage::SetTrack(m) => {
                room.state.current_track = Some(m.track.clone());
                room.state.is_playing = false;
                room.state.current_time = 0.0;
                send(outbox, &ServerMessage::Ack(AckMsg::ok(id)));
                broadcast(
                    room,
                    &ServerMessage::TrackChanged(TrackChangedMsg {
                        track: m.track,
                        room_state: room.state.clone(),
                    }),
                );
            },
            ClientMessage::Play(m) => {
                room.state.is_playing = true;
                room.state.current_time = m.position_offset;
                send(outbox, &ServerMessage::Ack(AckMsg::ok(id)));
                broadcast(
                    room,
                    &ServerMessage::SyncPlay(SyncPlayMsg {
                        start_time_offset: m.position_offset,
                        activate_at: now_millis() + ACTIVATION_LEAD_MS,
                        room_state: room.state.clone(),
                    }),
                );
            },
            ClientMessage::Pause(_) => {
                room.state.is_playing = false;
                send(outbox, &ServerMessage::Ack(AckMsg::ok(id)));
                broadcast(
                    room,
                    &ServerMessage::SyncPause(SyncPauseMsg {
                        position_offset: None,
                        room_state: room.state.clone(),
                    }),
                );
            },
            ClientMessage::Seek(m) => {
                room.state.current_time = m.position_offset;
                send(outbox, &ServerMessage::Ack(AckMsg::ok(id)));
                broadcast(
                    room,
                    &ServerMessage::SyncSeek(SyncSeekMsg {
                        position_offset: m.position_offset,
                        activate_at: now_millis() + ACTIVATION_LEAD_MS,
                        resume_playing: room.state.is_playing,
                        room_state: room.state.clone(),
                    }),
                );
            },
            ClientMessage::CreateRoom(_) | ClientMessage::JoinRoom(_) | ClientMessage::Ping(_) => {},
        }
    }

    fn remove_member(&self, room_code: &str, session_id: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(room_code) else {
            return;
        };
        room.members.remove(session_id);
        room.state.users.retain(|u| u != session_id);
        room.state.user_count = room.state.users.len() as u32;
        if room.state.users.is_empty() {
            rooms.remove(room_code);
            return;
        }
        if room.state.host_id == session_id {
            room.state.host_id = room.state.users[0].clone();
        }
        broadcast(
            room,
            &ServerMessage::UserLeft(UserLeftMsg {
                user_id: session_id.to_string(),
                room_state: room.state.clone(),
            }),
        );
    }
}

/// Room codes in the `ABCD-1234` format, without I or O.
fn generate_room_code() -> String {
    use rand::Rng;

    const LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    let mut rng = rand::rng();
    let mut code = String::with_capacity(9);
    for _ in 0..4 {
        code.push(LETTERS[rng.random_range(0..LETTERS.len())] as char);
    }
    code.push('-');
    for _ in 0..4 {
        code.push(char::from(b'0' + rng.random_range(0..10u8)));
    }
    code
}
