#[allow(dead_code)]
mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use syncbeats_client::{ClientConfig, SessionEvent, SyncClient, WsConnector};
use syncbeats_core::room::{Track, normalize_room_code};
use syncbeats_core::time::SystemClock;

use common::RecordingActuator;
use common::coordinator::TestServer;

fn start_client(
    server: &TestServer,
) -> (SyncClient, mpsc::Receiver<SessionEvent>, RecordingActuator) {
    let config = ClientConfig {
        server_url: server.ws_url(),
        ..ClientConfig::default()
    };
    let actuator = RecordingActuator::default();
    let (client, events) = SyncClient::start(
        config.clone(),
        WsConnector::new(config.server_url),
        actuator.clone(),
        SystemClock,
    );
    (client, events, actuator)
}

async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("session stopped");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

fn started_playing(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::PlaybackChanged { is_playing: true, .. })
}

#[tokio::test]
async fn two_listeners_start_together() {
    let server = TestServer::start().await;
    let (host, mut host_events, host_player) = start_client(&server);
    let (guest, mut guest_events, guest_player) = start_client(&server);

    host.connect().await.unwrap();
    guest.connect().await.unwrap();

    let room = host.create_room().await.unwrap();
    assert!(room.is_host);
    assert_eq!(normalize_room_code(&room.room_code).unwrap(), room.room_code);
    let joined = guest.join_room(&room.room_code.to_lowercase()).await.unwrap();
    assert_eq!(joined.room_code, room.room_code);
    assert!(!joined.is_host);
    assert_eq!(joined.room_state.user_count, 2);

    let guest_id = match wait_for(&mut host_events, |e| {
        matches!(e, SessionEvent::UserJoined(_))
    })
    .await
    {
        SessionEvent::UserJoined(id) => id,
        other => panic!("Expected user-joined, got: {other:?}"),
    };
    assert!(joined.room_state.users.contains(&guest_id));

    // Guests cannot drive the room.
    assert!(guest.play().await.is_err());

    let track = Track::stream("Night Drive", "https://cdn.example.com/night-drive.mp3");
    host.set_track(track.clone()).await.unwrap();
    let track_changed = SessionEvent::TrackChanged(track.clone());
    wait_for(&mut guest_events, |e| *e == track_changed).await;
    wait_for(&mut host_events, |e| *e == track_changed).await;

    host.play().await.unwrap();
    wait_for(&mut host_events, started_playing).await;
    wait_for(&mut guest_events, started_playing).await;

    let host_at = host_player.played_at().expect("host never played");
    let guest_at = guest_player.played_at().expect("guest never played");
    let skew = if host_at > guest_at {
        host_at - guest_at
    } else {
        guest_at - host_at
    };
    assert!(skew < Duration::from_millis(100), "clients started {skew:?} apart");

    host.pause().await.unwrap();
    wait_for(&mut guest_events, |e| {
        matches!(e, SessionEvent::PlaybackChanged { is_playing: false, .. })
    })
    .await;
    let guest_state = guest.snapshot().await.unwrap();
    assert!(!guest_state.is_playing);
    assert_eq!(guest_state.room.map(|r| r.is_playing), Some(false));

    guest.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn host_leaving_promotes_guest() {
    let server = TestServer::start().await;
    let (host, _host_events, _) = start_client(&server);
    let (guest, mut guest_events, _) = start_client(&server);

    host.connect().await.unwrap();
    guest.connect().await.unwrap();
    let room = host.create_room().await.unwrap();
    guest.join_room(&room.room_code).await.unwrap();

    host.leave_room().await.unwrap();
    wait_for(&mut guest_events, |e| {
        *e == SessionEvent::RoleChanged(syncbeats_client::RoleTransition::Promoted)
    })
    .await;

    let snapshot = guest.snapshot().await.unwrap();
    assert_eq!(snapshot.role, syncbeats_client::Role::Host);
    assert_eq!(snapshot.room.map(|r| r.user_count), Some(1));
}

#[tokio::test]
async fn joining_unknown_room_fails() {
    let server = TestServer::start().await;
    let (client, _events, _) = start_client(&server);
    client.connect().await.unwrap();

    let err = client.join_room("NOSUCHROOM").await.unwrap_err();
    assert!(err.to_string().contains("Room not found"), "{err}");
}
