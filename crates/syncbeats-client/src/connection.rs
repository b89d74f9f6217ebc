use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use syncbeats_core::net::messages::{ClientMessage, ServerMessage};
use syncbeats_core::net::protocol::{ProtocolError, decode_server_message, encode_client_message};
use syncbeats_core::net::transport::{Connector, Transport, TransportError};

use crate::config::{ClientConfig, ReconnectConfig};
use crate::delayed::DelayedTask;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for or running retry `attempt` after a drop.
    Reconnecting {
        attempt: u32,
    },
    /// Every retry failed. Only an explicit `connect()` starts over.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Bounded, growing backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub randomization_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            randomization_factor: config.randomization_factor,
        }
    }

    /// Delay before 1-based `attempt`: doubles from the initial delay, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        if self.randomization_factor <= 0.0 {
            return base;
        }
        use rand::Rng;
        let spread = self.randomization_factor.min(1.0);
        let scale = rand::rng().random_range(1.0 - spread..=1.0 + spread);
        base.mul_f64(scale)
    }
}

/// What the connection manager surfaced to the session.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A connect attempt succeeded. `after_attempts` is set when this ends a
    /// retry series.
    Connected { after_attempts: Option<u32> },
    Frame(ServerMessage),
    /// An inbound frame that could not be decoded. Dropped.
    Malformed(ProtocolError),
    /// The open connection dropped. The retry series has already started
    /// unless the state is `Failed`.
    Lost { reason: String },
    /// A connect attempt failed. Retried unless the state is `Failed`.
    ConnectFailed(TransportError),
    HeartbeatDue,
}

/// Owns the transport and every timer tied to it: connect attempts,
/// reconnect backoff and the heartbeat interval.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    heartbeat_period: Duration,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    transport: Option<C::Transport>,
    connecting: Option<JoinHandle<Result<C::Transport, TransportError>>>,
    retry: DelayedTask<()>,
    heartbeat: Option<Interval>,
    /// Retry attempts used in the current series.
    attempt: u32,
    /// Set once a series has started, so the eventual success is reported as
    /// a reconnection.
    in_series: bool,
    queued: Option<ConnectionEvent>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: &ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy: ReconnectPolicy::from_config(&config.reconnect),
            connect_timeout: config.connect_timeout(),
            heartbeat_period: Duration::from_millis(config.heartbeat.interval_ms),
            state: ConnectionState::Disconnected,
            state_tx,
            transport: None,
            connecting: None,
            retry: DelayedTask::new(),
            heartbeat: None,
            attempt: 0,
            in_series: false,
            queued: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Start connecting. A no-op while connected or already connecting;
    /// from `Failed` or `Disconnected` this starts a fresh series.
    pub fn connect(&mut self) {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {},
            ConnectionState::Reconnecting { .. } => {
                // Skip the remaining backoff.
                if self.retry.cancel().is_some() {
                    self.start_attempt();
                }
            },
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.attempt = 0;
                self.in_series = false;
                self.set_state(ConnectionState::Connecting);
                self.start_attempt();
            },
        }
    }

    /// Tear everything down and stay disconnected.
    pub async fn disconnect(&mut self) {
        self.retry.cancel();
        if let Some(attempt) = self.connecting.take() {
            attempt.abort();
        }
        self.heartbeat = None;
        self.queued = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.attempt = 0;
        self.in_series = false;
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), SyncError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(TransportError::NotConnected.into());
        };
        let frame = encode_client_message(msg)?;
        match transport.send(frame).await {
            Ok(()) => {
                tracing::trace!(kind = %msg.message_type(), id = msg.request_id(), "Sent");
                Ok(())
            },
            Err(e) => {
                self.queued = Some(self.connection_lost(loss_reason(&e), false));
                Err(e.into())
            },
        }
    }

    /// Wait for the next thing the session has to react to. Retry timers and
    /// connect attempts are driven internally. Cancel-safe.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        if let Some(event) = self.queued.take() {
            return event;
        }
        loop {
            tokio::select! {
                frame = recv_frame(self.transport.as_mut()) => {
                    return match frame {
                        Some(Ok(bytes)) => match decode_server_message(&bytes) {
                            Ok(msg) => ConnectionEvent::Frame(msg),
                            Err(e) => ConnectionEvent::Malformed(e),
                        },
                        Some(Err(e)) => self.connection_lost(loss_reason(&e), false),
                        None => self.connection_lost("closed by server".to_string(), true),
                    };
                },
                result = join_attempt(self.connecting.as_mut()) => {
                    self.connecting = None;
                    return match result {
                        Ok(transport) => self.opened(transport),
                        Err(e) => self.attempt_failed(e),
                    };
                },
                () = self.retry.expired() => {
                    self.start_attempt();
                },
                () = tick(self.heartbeat.as_mut()) => {
                    return ConnectionEvent::HeartbeatDue;
                },
            }
        }
    }

    fn start_attempt(&mut self) {
        if let Some(previous) = self.connecting.take() {
            previous.abort();
        }
        tracing::info!(attempt = self.attempt, "Connecting");
        let connect = self.connector.connect();
        let timeout = self.connect_timeout;
        self.connecting = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, connect).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::ConnectTimedOut),
            }
        }));
    }

    fn opened(&mut self, transport: C::Transport) -> ConnectionEvent {
        let after_attempts = self.in_series.then_some(self.attempt);
        match after_attempts {
            Some(n) => tracing::info!(attempts = n, "Reconnected"),
            None => tracing::info!("Connected"),
        }
        self.transport = Some(transport);
        self.attempt = 0;
        self.in_series = false;
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat_period,
            self.heartbeat_period,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
        self.set_state(ConnectionState::Connected);
        ConnectionEvent::Connected { after_attempts }
    }

    fn attempt_failed(&mut self, error: TransportError) -> ConnectionEvent {
        tracing::warn!(attempt = self.attempt, error = %error, "Connect attempt failed");
        self.schedule_retry(false);
        ConnectionEvent::ConnectFailed(error)
    }

    fn connection_lost(&mut self, reason: String, by_server: bool) -> ConnectionEvent {
        tracing::warn!(%reason, "Connection lost");
        self.transport = None;
        self.heartbeat = None;
        self.attempt = 0;
        self.schedule_retry(by_server);
        ConnectionEvent::Lost { reason }
    }

    /// Arm the next retry, or give up once the series is exhausted.
    fn schedule_retry(&mut self, immediate: bool) {
        self.in_series = true;
        if self.attempt >= self.policy.max_attempts {
            tracing::error!(attempts = self.attempt, "Giving up on reconnecting");
            self.set_state(ConnectionState::Failed);
            return;
        }
        self.attempt += 1;
        let delay = if immediate && self.attempt == 1 {
            Duration::ZERO
        } else {
            self.policy.delay_for(self.attempt)
        };
        tracing::info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.retry.arm(delay, ());
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.attempt,
        });
    }
}

fn loss_reason(error: &TransportError) -> String {
    match error {
        TransportError::ConnectionLost(reason) => reason.clone(),
        other => other.to_string(),
    }
}

async fn recv_frame<T: Transport>(
    transport: Option<&mut T>,
) -> Option<Result<Vec<u8>, TransportError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn join_attempt<T>(
    attempt: Option<&mut JoinHandle<Result<T, TransportError>>>,
) -> Result<T, TransportError> {
    match attempt {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::ConnectFailed(e.to_string())),
        },
        None => std::future::pending().await,
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        },
        None => std::future::pending().await,
    }
}
