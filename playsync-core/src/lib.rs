//! Playsync - Core Library
//!
//! Keeps media players on several hosts in lock-step. A master publishes its
//! player's position over UDP broadcast or multicast; each slave compares it
//! with its own player and nudges the playback rate or seeks to catch up.

pub mod config;
pub mod controller;
pub mod network;
pub mod player;
pub mod publisher;
pub mod sync;
pub mod task;

use std::sync::Once;

// Re-exports for convenience
pub use config::{ConfigError, SyncConfig, TransportMode};
pub use controller::{SyncController, SyncHandle};
pub use network::NetworkError;
pub use player::{Player, PlayerError, SimulatedPlayer};
pub use publisher::{Publisher, TickOutcome};
pub use sync::{PlaybackStatus, SyncMessage, SyncOutcome, SyncStatus};
pub use task::TaskHandle;

static TRACING_INIT: Once = Once::new();

/// Install the global log subscriber. Later calls are ignored.
///
/// `RUST_LOG` is honoured; `verbose` raises this crate to debug level.
pub fn init_tracing(verbose: bool) {
    TRACING_INIT.call_once(|| {
        let level = if verbose { "debug" } else { "info" };
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in [format!("playsync_core={level}"), format!("playsync_node={level}")] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }

        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}
