//! Playsync - Node
//!
//! Runs a master or slave against a simulated player.
//!
//! Usage:
//!   cargo run --release -- master --start 10
//!   cargo run --release -- slave --drift 1.01 --verbose

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use playsync_core::{
    init_tracing, PlaybackStatus, Player, Publisher, SimulatedPlayer, SyncConfig, SyncController,
    TransportMode,
};

#[derive(Parser, Debug)]
#[command(name = "playsync-node", version, about = "Keep media players in sync over UDP")]
struct Cli {
    #[command(subcommand)]
    role: Role,

    /// JSON config file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Destination (master) or bind address (slave); multicast group in multicast mode
    #[arg(long, global = true)]
    host: Option<Ipv4Addr>,

    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// broadcast or multicast
    #[arg(long, global = true)]
    mode: Option<TransportMode>,

    /// Interface address or device name
    #[arg(long, global = true)]
    interface: Option<String>,

    /// Seconds between broadcasts
    #[arg(long, global = true)]
    interval: Option<f64>,

    /// Deviation (seconds) tolerated without correction
    #[arg(long, global = true)]
    tolerance: Option<f64>,

    /// Deviation (seconds) at which the slave seeks
    #[arg(long, global = true)]
    big_tolerance: Option<f64>,

    /// Seconds at start and end of media where no correction happens
    #[arg(long, global = true)]
    grace_time: Option<f64>,

    /// Seconds added to the master position when seeking
    #[arg(long, global = true)]
    jump_ahead: Option<f64>,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Length of the simulated media in seconds
    #[arg(long, global = true, default_value_t = 300.0)]
    duration: f64,

    /// Start position of the simulated player
    #[arg(long, global = true, default_value_t = 0.0)]
    start: f64,

    /// Clock drift of the simulated player (1.0 = none)
    #[arg(long, global = true, default_value_t = 1.0)]
    drift: f64,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Role {
    /// Publish the local player's position
    Master,
    /// Follow a master
    Slave,
}

impl Cli {
    fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => SyncConfig::default(),
        };

        if self.host.is_some() {
            config.host = self.host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if self.interface.is_some() {
            config.interface = self.interface.clone();
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(big_tolerance) = self.big_tolerance {
            config.big_tolerance = big_tolerance;
        }
        if let Some(grace_time) = self.grace_time {
            config.grace_time = grace_time;
        }
        if let Some(jump_ahead) = self.jump_ahead {
            config.jump_ahead = jump_ahead;
        }
        config.verbose |= self.verbose;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn player(&self) -> Result<SimulatedPlayer> {
        if self.duration.is_nan() || self.duration <= 0.0 {
            anyhow::bail!("--duration must be positive");
        }
        if self.drift.is_nan() || self.drift <= 0.0 {
            anyhow::bail!("--drift must be positive");
        }
        let player =
            SimulatedPlayer::with_state(self.duration, self.start, PlaybackStatus::Playing);
        player.set_drift(self.drift);
        Ok(player)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.sync_config()?;
    init_tracing(config.verbose);

    let player = cli.player()?;
    match cli.role {
        Role::Master => run_master(player, config).await,
        Role::Slave => run_slave(player, config).await,
    }
}

async fn run_master(player: SimulatedPlayer, config: SyncConfig) -> Result<()> {
    info!("Starting master ({:?} to {})", config.mode, config.publish_addr());

    let mut publisher = Publisher::new(player, config);
    publisher
        .setup_with_retry()
        .await
        .context("Failed to open publisher socket")?;
    let mut handle = publisher.spawn();

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = wait_finished(|| handle.is_finished()) => false,
    };
    if interrupted {
        info!("Interrupted, shutting down");
        handle.shutdown();
    }

    handle.join().await.context("Publisher ended with an error")?;
    info!("Master stopped");
    Ok(())
}

async fn run_slave(player: SimulatedPlayer, config: SyncConfig) -> Result<()> {
    info!("Starting slave (listening on {})", config.listen_addr());
    report_local(&player).await;

    let mut controller = SyncController::new(player, config);
    controller
        .setup_with_retry()
        .await
        .context("Failed to open listener socket")?;
    let mut handle = controller.spawn();
    let mut status = handle.status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                handle.shutdown();
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    // Controller loop dropped its sender
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.network_degraded {
                    warn!("Network degraded: no usable sync messages");
                }
                info!(
                    "Sync status: {:?} (rate: {:?}, median deviation: {})",
                    current.last_outcome,
                    current.rate,
                    current
                        .median_deviation
                        .map_or_else(|| "-".to_string(), |d| format!("{d:+.3}s"))
                );
                match serde_json::to_string(&current) {
                    Ok(json) => debug!("Sync status: {}", json),
                    Err(e) => warn!("Failed to serialize sync status: {}", e),
                }
            }
        }
    }

    handle.join().await.context("Sync controller ended with an error")?;
    info!("Slave stopped");
    Ok(())
}

async fn report_local(player: &SimulatedPlayer) {
    let position = player.position().await;
    let duration = player.duration().await;
    if let (Ok(Some(position)), Ok(Some(duration))) = (position, duration) {
        info!("Local player at {:.2} of {:.2}", position, duration);
    }
}

async fn wait_finished(finished: impl Fn() -> bool) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(200));
    while !finished() {
        ticker.tick().await;
    }
}
