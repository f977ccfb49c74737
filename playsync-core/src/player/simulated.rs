//! In-process player driven by the tokio clock
//!
//! Used by the node binary to demonstrate sync without a real media engine,
//! and by tests to observe exactly which commands a component issued.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Player, PlayerError};
use crate::sync::{PlaybackStatus, SpeedStep};

/// Rate one step below normal
pub const SLOW_RATE: f64 = 0.975;

/// Normal playback rate
pub const NORMAL_RATE: f64 = 1.0;

/// Rate one step above normal
pub const FAST_RATE: f64 = 1.125;

const RATE_LADDER: [f64; 3] = [SLOW_RATE, NORMAL_RATE, FAST_RATE];
const NORMAL_INDEX: usize = 1;

/// A command received through the [`Player`] trait
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    SetStatus(PlaybackStatus),
    Seek(f64),
    Speed(SpeedStep),
}

#[derive(Debug)]
struct Inner {
    /// Position at `anchor`
    base_position: f64,
    anchor: Instant,
    duration: f64,
    status: PlaybackStatus,
    rate_index: usize,
    /// Clock error of this player, multiplied into the rate (1.0 = exact)
    drift: f64,
    ready: bool,
    disconnected: bool,
    commands: Vec<PlayerCommand>,
}

impl Inner {
    fn rate(&self) -> f64 {
        RATE_LADDER[self.rate_index] * self.drift
    }

    fn position_at(&self, now: Instant) -> f64 {
        if self.status != PlaybackStatus::Playing {
            return self.base_position;
        }
        let elapsed = now.saturating_duration_since(self.anchor).as_secs_f64();
        (self.base_position + elapsed * self.rate()).min(self.duration)
    }

    /// Fold elapsed playback into `base_position` before changing rate or status
    fn rebase(&mut self, now: Instant) {
        self.base_position = self.position_at(now);
        self.anchor = now;
        if self.status == PlaybackStatus::Playing && self.base_position >= self.duration {
            self.status = PlaybackStatus::Stopped;
        }
    }

    fn check_connected(&self) -> Result<(), PlayerError> {
        if self.disconnected {
            Err(PlayerError::Disconnected("simulated player shut down".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Cheaply cloneable handle to a simulated player
#[derive(Debug, Clone)]
pub struct SimulatedPlayer {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedPlayer {
    /// Create a paused player at position 0 with media of `duration` seconds
    pub fn new(duration: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                base_position: 0.0,
                anchor: Instant::now(),
                duration,
                status: PlaybackStatus::Paused,
                rate_index: NORMAL_INDEX,
                drift: 1.0,
                ready: true,
                disconnected: false,
                commands: Vec::new(),
            })),
        }
    }

    /// Start at `position` with the given status
    pub fn with_state(duration: f64, position: f64, status: PlaybackStatus) -> Self {
        let player = Self::new(duration);
        {
            let mut inner = player.inner.lock();
            inner.base_position = position;
            inner.status = status;
        }
        player
    }

    /// Make this player's clock run fast (> 1.0) or slow (< 1.0)
    pub fn set_drift(&self, drift: f64) {
        let mut inner = self.inner.lock();
        inner.rebase(Instant::now());
        inner.drift = drift;
    }

    /// While not ready, position and status report `None`
    pub fn set_ready(&self, ready: bool) {
        self.inner.lock().ready = ready;
    }

    /// Simulate the control channel going away
    pub fn disconnect(&self) {
        self.inner.lock().disconnected = true;
    }

    /// Move the playhead without recording a command
    pub fn jump_to(&self, position: f64) {
        let mut inner = self.inner.lock();
        inner.base_position = position;
        inner.anchor = Instant::now();
    }

    /// Change status without recording a command
    pub fn force_status(&self, status: PlaybackStatus) {
        let mut inner = self.inner.lock();
        inner.rebase(Instant::now());
        inner.status = status;
    }

    /// Effective playback rate
    pub fn rate(&self) -> f64 {
        self.inner.lock().rate()
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.inner.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().commands.clear();
    }
}

#[async_trait]
impl Player for SimulatedPlayer {
    async fn position(&self) -> Result<Option<f64>, PlayerError> {
        let mut inner = self.inner.lock();
        inner.check_connected()?;
        if !inner.ready {
            return Ok(None);
        }
        inner.rebase(Instant::now());
        Ok(Some(inner.base_position))
    }

    async fn duration(&self) -> Result<Option<f64>, PlayerError> {
        let inner = self.inner.lock();
        inner.check_connected()?;
        Ok(inner.ready.then_some(inner.duration))
    }

    async fn playback_status(&self) -> Result<Option<PlaybackStatus>, PlayerError> {
        let mut inner = self.inner.lock();
        inner.check_connected()?;
        if !inner.ready {
            return Ok(None);
        }
        inner.rebase(Instant::now());
        Ok(Some(inner.status))
    }

    async fn set_playback_status(&self, status: PlaybackStatus) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.check_connected()?;
        inner.rebase(Instant::now());
        inner.status = status;
        if status == PlaybackStatus::Stopped {
            inner.base_position = 0.0;
        }
        inner.commands.push(PlayerCommand::SetStatus(status));
        Ok(())
    }

    async fn set_position(&self, seconds: f64) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.check_connected()?;
        inner.base_position = seconds.clamp(0.0, inner.duration);
        inner.anchor = Instant::now();
        inner.commands.push(PlayerCommand::Seek(seconds));
        Ok(())
    }

    async fn apply_speed_step(&self, step: SpeedStep) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        inner.check_connected()?;
        inner.rebase(Instant::now());
        inner.rate_index = match step {
            SpeedStep::SlowDown => inner.rate_index.saturating_sub(1),
            SpeedStep::SpeedUp => (inner.rate_index + 1).min(RATE_LADDER.len() - 1),
        };
        inner.commands.push(PlayerCommand::Speed(step));
        Ok(())
    }
}
