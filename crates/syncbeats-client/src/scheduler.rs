use std::time::Duration;

use syncbeats_core::room::Track;
use syncbeats_core::sync::SyncCommand;

use crate::actuator::PlaybackActuator;
use crate::delayed::DelayedTask;
use crate::error::ActuationError;

/// Outcome of [`SyncScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scheduled {
    /// Activation instant already reached; applied inline.
    Applied,
    /// Waiting for the activation instant.
    Armed { delay: Duration },
    /// No track loaded, nothing to drive.
    Ignored,
}

/// Turns server sync commands into timed actuator calls.
///
/// At most one actuation is pending at a time: every new command cancels the
/// previous one before it is considered (last command wins).
#[derive(Debug, Default)]
pub struct SyncScheduler {
    pending: DelayedTask<SyncCommand>,
    loaded_url: Option<String>,
    is_playing: bool,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &mut self,
        command: SyncCommand,
        now_millis: u64,
        actuator: &mut impl PlaybackActuator,
    ) -> Result<Scheduled, ActuationError> {
        if let Some(replaced) = self.pending.cancel() {
            tracing::debug!(
                replaced = replaced.name(),
                by = command.name(),
                "Cancelled pending actuation"
            );
        }

        if self.loaded_url.is_none() {
            tracing::debug!(command = command.name(), "No track loaded, ignoring sync");
            return Ok(Scheduled::Ignored);
        }

        let delay = command.delay_from(now_millis);
        if delay.is_zero() {
            self.apply(command, actuator)?;
            return Ok(Scheduled::Applied);
        }

        tracing::debug!(
            command = command.name(),
            delay_ms = delay.as_millis() as u64,
            "Scheduled actuation"
        );
        self.pending.arm(delay, command);
        Ok(Scheduled::Armed { delay })
    }

    /// Wait for the pending actuation to come due. Pending forever when
    /// nothing is scheduled.
    pub async fn next_due(&mut self) -> SyncCommand {
        self.pending.expired().await
    }

    /// Apply `command` to the actuator. Playback only counts as resumed when
    /// the actuator accepted every step.
    pub fn apply(
        &mut self,
        command: SyncCommand,
        actuator: &mut impl PlaybackActuator,
    ) -> Result<(), ActuationError> {
        if command.resumes_playback() {
            if let Some(position) = command.position_offset() {
                actuator.set_position(position)?;
            }
            actuator.play()?;
        } else {
            actuator.pause();
            // Stopped even if the seek below fails.
            self.is_playing = false;
            if let Some(position) = command.position_offset() {
                actuator.set_position(position)?;
            }
        }
        self.is_playing = command.resumes_playback();
        tracing::debug!(
            command = command.name(),
            position = actuator.position(),
            is_playing = self.is_playing,
            "Applied sync command"
        );
        Ok(())
    }

    /// Load `track` unless it is already the current source. A new source
    /// cancels any pending actuation and stops playback.
    pub fn load(
        &mut self,
        track: &Track,
        actuator: &mut impl PlaybackActuator,
    ) -> Result<bool, ActuationError> {
        if self.loaded_url.as_deref() == Some(track.url.as_str()) {
            return Ok(false);
        }
        self.pending.cancel();
        self.is_playing = false;
        self.loaded_url = None;
        actuator.load(&track.url)?;
        self.loaded_url = Some(track.url.clone());
        tracing::info!(title = %track.title, url = %track.url, "Loaded track");
        Ok(true)
    }

    /// Drop the current source and anything pending.
    pub fn unload(&mut self, actuator: &mut impl PlaybackActuator) {
        self.pending.cancel();
        if self.loaded_url.take().is_some() {
            actuator.pause();
        }
        self.is_playing = false;
    }

    pub fn cancel(&mut self) -> Option<SyncCommand> {
        self.pending.cancel()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_armed()
    }

    pub fn has_track(&self) -> bool {
        self.loaded_url.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Record a transport change the engine reported on its own (track
    /// ended, media error).
    pub fn set_playing(&mut self, is_playing: bool) {
        self.is_playing = is_playing;
    }
}
