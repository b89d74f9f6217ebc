use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use syncbeats_client::{
    ClientConfig, SessionEvent, SyncClient, SyncError, VirtualActuator, WsConnector,
};
use syncbeats_core::room::Track;
use syncbeats_core::time::SystemClock;

/// Length assumed for every track by the headless player.
const VIRTUAL_TRACK_LENGTH: Duration = Duration::from_secs(240);

const USAGE: &str = "\
usage: syncbeats [--server=<ws-url>] [--create | --join=<room-code>]

commands on stdin:
  create | join <code> | leave | refresh
  track <url> [title] | play | pause | toggle | seek <secs> | next | prev
  state | quit";

#[derive(Debug, Default)]
struct Args {
    server: Option<String>,
    create: bool,
    join: Option<String>,
}

impl Args {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Args::default();
        for arg in args {
            if let Some(url) = arg.strip_prefix("--server=") {
                parsed.server = Some(url.to_string());
            } else if let Some(code) = arg.strip_prefix("--join=") {
                parsed.join = Some(code.to_string());
            } else if arg == "--create" {
                parsed.create = true;
            } else {
                return Err(format!("unknown argument: {arg}"));
            }
        }
        if parsed.create && parsed.join.is_some() {
            return Err("--create and --join are mutually exclusive".to_string());
        }
        Ok(parsed)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        },
    };

    let mut config = ClientConfig::load();
    if let Some(url) = args.server {
        config.server_url = url;
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    tracing::info!(server = %config.server_url, "SyncBeats client starting");
    let connector = WsConnector::new(config.server_url.clone());
    let actuator = VirtualActuator::new(VIRTUAL_TRACK_LENGTH);
    let (client, mut events) = SyncClient::start(config, connector, actuator, SystemClock);

    if let Err(e) = client.connect().await {
        tracing::error!(error = %e, "Could not reach server");
        client.shutdown().await;
        std::process::exit(1);
    }

    if args.create {
        report("create", client.create_room().await.map(|_| ()));
    } else if let Some(code) = args.join {
        report("join", client.join_room(&code).await.map(|_| ()));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&client, line.trim()).await {
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                },
            },
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    client.shutdown().await;
    tracing::info!("SyncBeats client stopped");
}

/// Run one stdin command. Returns `false` to quit.
async fn run_command(client: &SyncClient, line: &str) -> bool {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(c, r)| (c, r.trim()));

    let result = match command {
        "" => return true,
        "quit" | "exit" => return false,
        "help" => {
            println!("{USAGE}");
            return true;
        },
        "state" => {
            match client.snapshot().await {
                Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to render state"),
                },
                Err(e) => report(command, Err(e)),
            }
            return true;
        },
        "create" => client.create_room().await.map(|_| ()),
        "join" => client.join_room(rest).await.map(|_| ()),
        "leave" => client.leave_room().await,
        "refresh" => client.refresh_room_state().await.map(|_| ()),
        "track" => {
            let (url, title) = rest
                .split_once(char::is_whitespace)
                .map_or((rest, rest), |(u, t)| (u, t.trim()));
            if url.is_empty() {
                println!("usage: track <url> [title]");
                return true;
            }
            client.set_track(Track::stream(title, url)).await
        },
        "play" => client.play().await,
        "pause" => client.pause().await,
        "toggle" => client.toggle_play().await,
        "seek" => match rest.parse::<f64>() {
            Ok(secs) => client.seek(secs).await,
            Err(_) => {
                println!("usage: seek <secs>");
                return true;
            },
        },
        "next" => client.next_track().await,
        "prev" => client.previous_track().await,
        other => {
            println!("unknown command: {other} (try `help`)");
            return true;
        },
    };
    report(command, result);
    true
}

fn report(command: &str, result: Result<(), SyncError>) {
    match result {
        Ok(()) => tracing::debug!(command, "ok"),
        Err(e) => tracing::warn!(command, error = %e, "Command failed"),
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ConnectionChanged(state) => tracing::info!(%state, "Connection"),
        SessionEvent::RoomJoined { room_code, is_host } => {
            tracing::info!(room = %room_code, is_host, "Joined room");
        },
        SessionEvent::RoomUpdated(state) => {
            tracing::debug!(users = state.user_count, host = %state.host_id, "Room updated");
        },
        SessionEvent::PlaybackChanged {
            is_playing,
            position,
        } => tracing::info!(is_playing, position, "Playback"),
        SessionEvent::Latency(rtt) => tracing::debug!(rtt_ms = rtt.as_millis() as u64, "Latency"),
        SessionEvent::Error(e) => tracing::warn!(error = %e, "Session error"),
        other => tracing::info!(event = ?other, "Session event"),
    }
}
