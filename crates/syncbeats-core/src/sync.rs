use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A transport transition issued by the server. `activate_at` is an absolute
/// wall-clock instant (ms since the Unix epoch) broadcast unchanged to every
/// client, so each client targets the same moment no matter when the message
/// arrived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SyncCommand {
    Play {
        start_time_offset: f64,
        activate_at: u64,
    },
    /// Applied as soon as it arrives. A missing offset leaves the position alone.
    Pause { position_offset: Option<f64> },
    Seek {
        position_offset: f64,
        activate_at: u64,
        resume_playing: bool,
    },
}

impl SyncCommand {
    pub fn activate_at(&self) -> Option<u64> {
        match self {
            Self::Play { activate_at, .. } | Self::Seek { activate_at, .. } => Some(*activate_at),
            Self::Pause { .. } => None,
        }
    }

    /// Position the actuator is moved to before resuming or pausing.
    pub fn position_offset(&self) -> Option<f64> {
        match self {
            Self::Play {
                start_time_offset, ..
            } => Some(*start_time_offset),
            Self::Pause { position_offset } => *position_offset,
            Self::Seek {
                position_offset, ..
            } => Some(*position_offset),
        }
    }

    /// Whether the transport is running once the command has been applied.
    pub fn resumes_playback(&self) -> bool {
        match self {
            Self::Play { .. } => true,
            Self::Pause { .. } => false,
            Self::Seek { resume_playing, .. } => *resume_playing,
        }
    }

    /// How long to wait, measured from `now_millis`, before applying.
    pub fn delay_from(&self, now_millis: u64) -> Duration {
        self.activate_at()
            .map_or(Duration::ZERO, |at| activation_delay(at, now_millis))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Play { .. } => "play",
            Self::Pause { .. } => "pause",
            Self::Seek { .. } => "seek",
        }
    }
}

/// `max(0, activate_at - now)`. An instant already in the past means
/// "apply immediately".
pub fn activation_delay(activate_at: u64, now_millis: u64) -> Duration {
    Duration::from_millis(activate_at.saturating_sub(now_millis))
}
