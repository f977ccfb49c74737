//! Master-side publisher
//!
//! Samples the local player on a fixed cadence and sends the snapshot to the
//! slaves. Network trouble never stops the loop; only a dead player does.

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::network::{self, NetworkError};
use crate::player::{Player, PlayerError};
use crate::sync::{PlaybackStatus, SyncMessage};
use crate::task::{is_cancelled, TaskHandle};

/// Result of one [`Publisher::tick`]
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Next broadcast time not reached yet
    NotDue,
    /// Player has not started; nothing sent, next broadcast rescheduled.
    /// Carries the status the player reported, if any.
    Skipped(Option<PlaybackStatus>),
    /// Snapshot sent
    Sent(SyncMessage),
    /// Snapshot could not be sent; the socket stays open
    SendFailed(SyncMessage),
}

/// Periodically broadcasts the local player's state
pub struct Publisher<P: Player> {
    player: P,
    config: SyncConfig,
    socket: Option<UdpSocket>,
    /// `None` until the first tick, which always sends
    next_broadcast: Option<Instant>,
    send_errors: u64,
}

impl<P: Player> Publisher<P> {
    pub fn new(player: P, config: SyncConfig) -> Self {
        Self {
            player,
            config,
            socket: None,
            next_broadcast: None,
            send_errors: 0,
        }
    }

    /// Open the outbound socket. Safe to call again after a failure.
    pub async fn setup(&mut self) -> Result<(), NetworkError> {
        let socket = network::open_publisher_socket(&self.config).await?;
        self.socket = Some(socket);
        Ok(())
    }

    /// [`setup`](Self::setup) with the configured fixed-delay retries
    pub async fn setup_with_retry(&mut self) -> Result<(), NetworkError> {
        let config = self.config.clone();
        let socket = network::with_setup_retry(
            config.setup_retries,
            config.setup_retry_delay(),
            || network::open_publisher_socket(&config),
        )
        .await?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Release the socket
    pub fn destroy(&mut self) {
        if self.socket.take().is_some() {
            debug!("Publisher socket closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Total failed sends since creation
    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Broadcast the player's state if the interval has elapsed at `now`
    pub async fn tick(&mut self, now: Instant) -> Result<TickOutcome, PlayerError> {
        if let Some(next) = self.next_broadcast {
            if now < next {
                return Ok(TickOutcome::NotDue);
            }
        }
        self.next_broadcast = Some(now + self.config.interval());

        let (status, message) = self.sample().await?;
        let Some(message) = message else {
            debug!("Player not started yet, skipping broadcast");
            return Ok(TickOutcome::Skipped(status));
        };

        match self.send(&message).await {
            Ok(()) => {
                debug!(
                    "Broadcast position: {:.2} of {:.2} ({})",
                    message.position, message.duration, message.status
                );
                Ok(TickOutcome::Sent(message))
            }
            Err(e) => {
                self.send_errors += 1;
                warn!("Broadcast failed: {}", e);
                Ok(TickOutcome::SendFailed(message))
            }
        }
    }

    /// Read the player. The message is `None` while it has not started.
    async fn sample(&self) -> Result<(Option<PlaybackStatus>, Option<SyncMessage>), PlayerError> {
        let position = self.player.position().await?;
        let duration = self.player.duration().await?;
        let status = self.player.playback_status().await?;

        let started = position.is_some_and(|p| p != 0.0) || duration.is_some_and(|d| d != 0.0);
        let message = match status {
            Some(status) if started || status != PlaybackStatus::Stopped => Some(SyncMessage {
                position: position.unwrap_or(0.0),
                duration: duration.unwrap_or(0.0),
                status,
            }),
            _ => None,
        };
        Ok((status, message))
    }

    async fn send(&self, message: &SyncMessage) -> Result<(), NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::NotConnected)?;
        socket
            .send(&message.encode())
            .await
            .map_err(NetworkError::Send)?;
        Ok(())
    }

    /// Tick until the player stops, the player fails, or `cancel` fires.
    ///
    /// The socket is released on exit.
    pub async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> Result<(), PlayerError> {
        info!("Publisher loop started");
        let poll = self.config.poll_interval();

        let result = loop {
            if is_cancelled(&mut cancel) {
                info!("Publisher loop cancelled");
                break Ok(());
            }

            match self.tick(Instant::now()).await {
                Ok(TickOutcome::Sent(msg)) | Ok(TickOutcome::SendFailed(msg))
                    if msg.status == PlaybackStatus::Stopped =>
                {
                    info!("Player stopped, ending publisher loop");
                    break Ok(());
                }
                Ok(TickOutcome::Skipped(Some(PlaybackStatus::Stopped))) => {
                    info!("Player stopped before playback started, ending publisher loop");
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    warn!("Player unavailable, ending publisher loop: {}", e);
                    break Err(e);
                }
                Err(e) => warn!("Failed to sample player: {}", e),
            }

            tokio::time::sleep(poll).await;
        };

        self.destroy();
        info!("Publisher loop ended");
        result
    }
}

impl<P: Player + 'static> Publisher<P> {
    /// Run the loop on its own tokio task
    pub fn spawn(self) -> TaskHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(cancel_rx));
        TaskHandle::new(cancel_tx, join)
    }
}
