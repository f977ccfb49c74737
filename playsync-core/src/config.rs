//! Sync configuration
//!
//! One immutable [`SyncConfig`] is handed to each publisher or controller.
//! It deserializes from JSON with camelCase keys and every field optional.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default UDP port
pub const DEFAULT_PORT: u16 = 1666;

/// Default destination in broadcast mode
pub const DEFAULT_BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Default group in multicast mode (organization-local scope)
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 16, 66);

/// Default publish interval (seconds)
pub const DEFAULT_INTERVAL: f64 = 1.0;

/// Deviation considered acceptable for the slave to be ahead or behind (seconds)
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Deviation above which a seek is performed instead of a rate nudge (seconds)
pub const DEFAULT_BIG_TOLERANCE: f64 = 3.0;

/// Time near start and end of media where no corrections happen (seconds)
pub const DEFAULT_GRACE_TIME: f64 = 3.0;

/// Added to the seek target to absorb the latency of the seek itself (seconds)
pub const DEFAULT_JUMP_AHEAD: f64 = 1.0;

/// Sleep between loop iterations (seconds)
pub const DEFAULT_POLL_INTERVAL: f64 = 0.01;

/// Multicast hop limit; 1 keeps traffic on the local segment
pub const DEFAULT_MULTICAST_TTL: u32 = 1;

/// Socket setup attempts before giving up
pub const DEFAULT_SETUP_RETRIES: u32 = 5;

/// Fixed delay between socket setup attempts (seconds)
pub const DEFAULT_SETUP_RETRY_DELAY: f64 = 2.0;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// How datagrams reach the slaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Broadcast,
    Multicast,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(TransportMode::Broadcast),
            "multicast" => Ok(TransportMode::Multicast),
            other => Err(ConfigError::Invalid {
                field: "mode",
                reason: format!("expected broadcast or multicast, got {other:?}"),
            }),
        }
    }
}

/// Settings for both the publisher and the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Destination (publisher) or bind/group address (controller).
    /// `None` picks the default for the role and mode.
    pub host: Option<Ipv4Addr>,
    /// UDP port
    pub port: u16,
    /// Broadcast or multicast
    pub mode: TransportMode,
    /// Network interface: an IPv4 address, or a device name (Linux only)
    pub interface: Option<String>,
    /// Publish interval in seconds
    pub interval: f64,
    /// Acceptable deviation in seconds
    pub tolerance: f64,
    /// Deviation in seconds at or above which the controller seeks
    pub big_tolerance: f64,
    /// Seconds near start/end of media without corrections
    pub grace_time: f64,
    /// Seconds added to the seek target
    pub jump_ahead: f64,
    /// Seconds between loop iterations
    pub poll_interval: f64,
    /// Multicast TTL
    pub multicast_ttl: u32,
    /// Socket setup attempts
    pub setup_retries: u32,
    /// Seconds between socket setup attempts
    pub setup_retry_delay: f64,
    /// Debug logging
    pub verbose: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            mode: TransportMode::Broadcast,
            interface: None,
            interval: DEFAULT_INTERVAL,
            tolerance: DEFAULT_TOLERANCE,
            big_tolerance: DEFAULT_BIG_TOLERANCE,
            grace_time: DEFAULT_GRACE_TIME,
            jump_ahead: DEFAULT_JUMP_AHEAD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            setup_retries: DEFAULT_SETUP_RETRIES,
            setup_retry_delay: DEFAULT_SETUP_RETRY_DELAY,
            verbose: false,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("interval", self.interval)?;
        positive("tolerance", self.tolerance)?;
        positive("pollInterval", self.poll_interval)?;
        non_negative("graceTime", self.grace_time)?;
        non_negative("jumpAhead", self.jump_ahead)?;
        non_negative("setupRetryDelay", self.setup_retry_delay)?;

        if self.big_tolerance.is_nan() || self.big_tolerance <= self.tolerance {
            return Err(ConfigError::Invalid {
                field: "bigTolerance",
                reason: format!(
                    "must be greater than tolerance ({} <= {})",
                    self.big_tolerance, self.tolerance
                ),
            });
        }
        if self.multicast_ttl == 0 {
            return Err(ConfigError::Invalid {
                field: "multicastTtl",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(host) = self.host {
            if self.mode == TransportMode::Multicast && !host.is_multicast() {
                return Err(ConfigError::Invalid {
                    field: "host",
                    reason: format!("{host} is not a multicast group"),
                });
            }
        }
        Ok(())
    }

    /// Where the publisher sends datagrams
    pub fn publish_addr(&self) -> SocketAddrV4 {
        let ip = self.host.unwrap_or(match self.mode {
            TransportMode::Broadcast => DEFAULT_BROADCAST_ADDR,
            TransportMode::Multicast => DEFAULT_MULTICAST_GROUP,
        });
        SocketAddrV4::new(ip, self.port)
    }

    /// Where the controller binds its socket
    pub fn listen_addr(&self) -> SocketAddrV4 {
        let ip = match self.mode {
            TransportMode::Broadcast => self.host.unwrap_or(Ipv4Addr::UNSPECIFIED),
            // Group membership is separate from the bind address
            TransportMode::Multicast => Ipv4Addr::UNSPECIFIED,
        };
        SocketAddrV4::new(ip, self.port)
    }

    /// Multicast group the controller joins
    pub fn multicast_group(&self) -> Ipv4Addr {
        self.host.unwrap_or(DEFAULT_MULTICAST_GROUP)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }

    pub fn setup_retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.setup_retry_delay)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be zero or positive, got {value}"),
        })
    }
}
