//! The seam between the sync engine and whatever actually renders audio.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::ActuationError;

/// Sender half handed to an actuator for asynchronous notifications.
pub type PlayerEvents = mpsc::Sender<PlayerEvent>;

/// Capacity of the player notification channel.
pub const PLAYER_EVENT_CAPACITY: usize = 64;

/// Local audio engine driven by the scheduler. Positions are in seconds.
pub trait PlaybackActuator: Send + Sync + 'static {
    /// Hand over the channel for [`PlayerEvent`]s. Called once before use.
    fn subscribe(&mut self, events: PlayerEvents);

    /// Replace the current source. Playback stops.
    fn load(&mut self, url: &str) -> Result<(), ActuationError>;

    fn play(&mut self) -> Result<(), ActuationError>;

    fn pause(&mut self);

    fn position(&self) -> f64;

    fn set_position(&mut self, secs: f64) -> Result<(), ActuationError>;

    /// `None` until the source's length is known.
    fn duration(&self) -> Option<f64>;
}

/// Asynchronous notifications from the audio engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    LoadStarted,
    Ready,
    Buffering,
    Playing,
    Ended,
    Error(MediaError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    Aborted,
    Network,
    Decode,
    SourceNotSupported,
    Other(String),
}

impl MediaError {
    /// Map a numeric media error code (1 aborted, 2 network, 3 decode,
    /// 4 source not supported).
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Aborted,
            2 => Self::Network,
            3 => Self::Decode,
            4 => Self::SourceNotSupported,
            other => Self::Other(format!("media error code {other}")),
        }
    }
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aborted => write!(f, "Audio playback aborted"),
            Self::Network => write!(f, "Network error while loading audio"),
            Self::Decode => write!(f, "Audio format not supported"),
            Self::SourceNotSupported => write!(f, "Audio source not supported"),
            Self::Other(e) => write!(f, "Error loading audio: {e}"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Headless actuator: no audio output, position advances with the tokio
/// clock while playing. Reports `Ended` when the fixed track length is
/// reached.
pub struct VirtualActuator {
    track_length: f64,
    loaded: Option<String>,
    /// Position at `started_at`, or the resting position while paused.
    anchor: f64,
    started_at: Option<Instant>,
    events: Option<PlayerEvents>,
    end_timer: Option<AbortHandle>,
}

impl VirtualActuator {
    pub fn new(track_length: Duration) -> Self {
        Self {
            track_length: track_length.as_secs_f64(),
            loaded: None,
            anchor: 0.0,
            started_at: None,
            events: None,
            end_timer: None,
        }
    }

    pub fn loaded_url(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.started_at.is_some() && self.position() < self.track_length
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(events) = &self.events {
            let _ = events.try_send(event);
        }
    }

    fn stop_end_timer(&mut self) {
        if let Some(timer) = self.end_timer.take() {
            timer.abort();
        }
    }

    fn start_end_timer(&mut self) {
        self.stop_end_timer();
        let Some(events) = self.events.clone() else {
            return;
        };
        let remaining = Duration::from_secs_f64((self.track_length - self.anchor).max(0.0));
        let handle = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = events.send(PlayerEvent::Ended).await;
        });
        self.end_timer = Some(handle.abort_handle());
    }

    /// Fold a finished run back into the paused state.
    fn settle(&mut self) {
        if self.started_at.is_some() && self.position() >= self.track_length {
            self.anchor = self.track_length;
            self.started_at = None;
            self.end_timer = None;
        }
    }
}

impl Drop for VirtualActuator {
    fn drop(&mut self) {
        self.stop_end_timer();
    }
}

impl PlaybackActuator for VirtualActuator {
    fn subscribe(&mut self, events: PlayerEvents) {
        self.events = Some(events);
    }

    fn load(&mut self, url: &str) -> Result<(), ActuationError> {
        if url.is_empty() {
            self.emit(PlayerEvent::Error(MediaError::SourceNotSupported));
            return Err(ActuationError::Playback("empty source url".to_string()));
        }
        self.stop_end_timer();
        self.loaded = Some(url.to_string());
        self.anchor = 0.0;
        self.started_at = None;
        self.emit(PlayerEvent::LoadStarted);
        self.emit(PlayerEvent::Ready);
        Ok(())
    }

    fn play(&mut self) -> Result<(), ActuationError> {
        if self.loaded.is_none() {
            return Err(ActuationError::NotLoaded);
        }
        self.settle();
        if self.started_at.is_some() {
            return Ok(());
        }
        if self.anchor >= self.track_length {
            self.anchor = 0.0;
        }
        self.started_at = Some(Instant::now());
        self.start_end_timer();
        self.emit(PlayerEvent::Playing);
        Ok(())
    }

    fn pause(&mut self) {
        self.settle();
        self.anchor = self.position();
        self.started_at = None;
        self.stop_end_timer();
    }

    fn position(&self) -> f64 {
        match self.started_at {
            Some(started) => (self.anchor + started.elapsed().as_secs_f64()).min(self.track_length),
            None => self.anchor,
        }
    }

    fn set_position(&mut self, secs: f64) -> Result<(), ActuationError> {
        if self.loaded.is_none() {
            return Err(ActuationError::NotLoaded);
        }
        if !secs.is_finite() || secs < 0.0 {
            return Err(ActuationError::InvalidPosition(secs));
        }
        self.settle();
        self.anchor = secs.min(self.track_length);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
            self.start_end_timer();
        }
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.loaded.as_ref().map(|_| self.track_length)
    }
}
