//! Player Adapter
//!
//! The capability surface the publisher and controller need from a local
//! media player. The playback engine and its control channel live behind
//! this trait.

mod simulated;

use async_trait::async_trait;
use thiserror::Error;

use crate::sync::{PlaybackStatus, SpeedStep};

pub use simulated::{PlayerCommand, SimulatedPlayer, FAST_RATE, NORMAL_RATE, SLOW_RATE};

/// Errors that can occur when talking to the player
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    /// The control channel is gone; nothing more can be done with this player
    #[error("Player control channel closed: {0}")]
    Disconnected(String),

    /// A single command failed; the player is still usable
    #[error("Player command failed: {0}")]
    Command(String),
}

impl PlayerError {
    /// Whether the controlling loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlayerError::Disconnected(_))
    }
}

/// Control surface of a local media player
#[async_trait]
pub trait Player: Send + Sync {
    /// Current playback position in seconds, `None` if not available yet
    async fn position(&self) -> Result<Option<f64>, PlayerError>;

    /// Media duration in seconds, `None` if not available yet
    async fn duration(&self) -> Result<Option<f64>, PlayerError>;

    /// Current playback status, `None` if not available yet
    async fn playback_status(&self) -> Result<Option<PlaybackStatus>, PlayerError>;

    /// Put the player into `status`
    async fn set_playback_status(&self, status: PlaybackStatus) -> Result<(), PlayerError>;

    /// Seek to an absolute position in seconds
    async fn set_position(&self, seconds: f64) -> Result<(), PlayerError>;

    /// Nudge the playback rate by one discrete step
    async fn apply_speed_step(&self, step: SpeedStep) -> Result<(), PlayerError>;
}
