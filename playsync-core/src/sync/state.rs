//! Correction State Management

use serde::Serialize;

use super::protocol::{PlaybackStatus, SyncMessage};

/// Discrete direction of a playback-rate nudge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedStep {
    SlowDown,
    SpeedUp,
}

/// Currently applied playback-rate level, at most one step away from Normal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum RateLevel {
    Slow = 0,
    #[default]
    Normal = 1,
    Fast = 2,
}

impl RateLevel {
    /// Level reached by applying `step`, or `None` if already at the limit
    pub fn stepped(self, step: SpeedStep) -> Option<Self> {
        match (self, step) {
            (RateLevel::Fast, SpeedStep::SlowDown) => Some(RateLevel::Normal),
            (RateLevel::Normal, SpeedStep::SlowDown) => Some(RateLevel::Slow),
            (RateLevel::Slow, SpeedStep::SpeedUp) => Some(RateLevel::Normal),
            (RateLevel::Normal, SpeedStep::SpeedUp) => Some(RateLevel::Fast),
            _ => None,
        }
    }

    /// Step that brings this level back to Normal, if any
    pub fn reset_step(self) -> Option<SpeedStep> {
        match self {
            RateLevel::Slow => Some(SpeedStep::SpeedUp),
            RateLevel::Normal => None,
            RateLevel::Fast => Some(SpeedStep::SlowDown),
        }
    }

    pub fn is_normal(self) -> bool {
        self == RateLevel::Normal
    }
}

/// Whether master and local media are known to be the same file
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub enum DurationGate {
    /// Not checked yet
    #[default]
    Unknown,
    /// Durations agreed once; not checked again this session
    Matched,
    /// Last check disagreed; sync withheld and rechecked every iteration
    Mismatched { remote: f64, local: f64 },
}

impl DurationGate {
    pub fn is_matched(&self) -> bool {
        matches!(self, DurationGate::Matched)
    }
}

/// Latest master state decoded from the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RemoteState {
    pub position: f64,
    pub duration: f64,
    pub status: PlaybackStatus,
}

impl From<SyncMessage> for RemoteState {
    fn from(msg: SyncMessage) -> Self {
        Self {
            position: msg.position,
            duration: msg.duration,
            status: msg.status,
        }
    }
}

/// Local player state read at one evaluation instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalSnapshot {
    pub position: f64,
    pub duration: Option<f64>,
    pub status: PlaybackStatus,
}

/// What one evaluation cycle did
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SyncOutcome {
    /// No datagram this cycle
    NoData,
    /// Datagram could not be decoded
    Malformed,
    /// Local player could not report position/status yet
    NotReady,
    /// Master is paused or stopped; no drift correction
    Idle,
    /// Master and local media durations disagree
    DurationMismatch,
    /// Near start or end of media
    GraceZone,
    /// Median deviation within tolerance
    InSync,
    /// Rate nudged by one step (or held at the limit when `step` is `None`)
    SoftCorrection {
        step: Option<SpeedStep>,
        level: RateLevel,
    },
    /// Seeked to the master position plus jump-ahead
    HardCorrection { target: f64 },
}

/// Snapshot of the controller for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Latest master state
    pub remote: Option<RemoteState>,
    /// Deviation measured at the last evaluation (positive = master ahead)
    pub deviation: Option<f64>,
    /// Median of the deviation window at the last evaluation
    pub median_deviation: Option<f64>,
    /// Applied rate level
    pub rate: RateLevel,
    /// Media compatibility gate
    pub duration_gate: DurationGate,
    /// More than the tolerated number of consecutive bad datagrams
    pub network_degraded: bool,
    /// Result of the last cycle
    pub last_outcome: SyncOutcome,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            remote: None,
            deviation: None,
            median_deviation: None,
            rate: RateLevel::Normal,
            duration_gate: DurationGate::Unknown,
            network_degraded: false,
            last_outcome: SyncOutcome::NoData,
        }
    }
}
