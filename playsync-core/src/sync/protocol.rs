//! Sync Protocol Messages
//!
//! A datagram is a plain UTF-8 snapshot of the master's player:
//! `<position>%<duration>%<status>`. There is no sequence number, so every
//! message stands on its own and loss or reordering only costs freshness.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field delimiter on the wire
pub const DELIMITER: char = '%';

/// Largest datagram we expect to receive
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Errors produced while decoding a datagram
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("datagram is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected 3 fields, found {0}")]
    MissingFields(usize),

    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unknown playback status: {0:?}")]
    UnknownStatus(String),
}

/// Playback state of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    /// Token used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Playing" => Ok(PlaybackStatus::Playing),
            "Paused" => Ok(PlaybackStatus::Paused),
            "Stopped" => Ok(PlaybackStatus::Stopped),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// Master playback snapshot carried by one datagram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Playback position in seconds
    pub position: f64,
    /// Media duration in seconds
    pub duration: f64,
    /// Playback status
    pub status: PlaybackStatus,
}

impl SyncMessage {
    pub fn new(position: f64, duration: f64, status: PlaybackStatus) -> Self {
        Self {
            position,
            duration,
            status,
        }
    }

    /// Encode into the delimited wire format
    pub fn encode(&self) -> Vec<u8> {
        encode(self.position, self.duration, self.status)
    }

    /// Decode from the delimited wire format
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        decode(bytes)
    }
}

/// Encode a snapshot as `<position>%<duration>%<status>`.
///
/// Floats use Rust's shortest round-trip representation, so decoding yields
/// the exact same values.
pub fn encode(position: f64, duration: f64, status: PlaybackStatus) -> Vec<u8> {
    format!("{position}{DELIMITER}{duration}{DELIMITER}{status}").into_bytes()
}

/// Decode a datagram produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<SyncMessage, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)?;

    let fields: Vec<&str> = text.splitn(3, DELIMITER).collect();
    if fields.len() < 3 {
        return Err(ParseError::MissingFields(fields.len()));
    }

    let position = parse_seconds("position", fields[0])?;
    let duration = parse_seconds("duration", fields[1])?;
    // Senders may pad the datagram (NUL or newline); the token itself never contains either
    let status = fields[2]
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .parse()?;

    Ok(SyncMessage {
        position,
        duration,
        status,
    })
}

fn parse_seconds(field: &'static str, value: &str) -> Result<f64, ParseError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}
