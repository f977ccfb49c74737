//! Slave-side sync controller
//!
//! Receives master snapshots, filters the measured deviation through a
//! median window and corrects the local player: a rate nudge for small
//! drift, a seek for large drift. One controller drives one player.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::network::{self, NetworkError};
use crate::player::{Player, PlayerError};
use crate::sync::{
    DeviationWindow, DurationGate, LocalSnapshot, PlaybackStatus, RateLevel, RemoteState,
    SpeedStep, SyncMessage, SyncOutcome, SyncStatus, MAX_DATAGRAM_SIZE,
};
use crate::task::{is_cancelled, TaskHandle};

/// Consecutive bad datagrams after which the network is reported as degraded
pub const MAX_CONSECUTIVE_NET_ERRORS: u32 = 20;

/// Maximum duration difference (seconds) for master and slave media to count as the same
pub const DURATION_MATCH_TOLERANCE: f64 = 1.0;

/// Tracks one master and corrects one local player
pub struct SyncController<P: Player> {
    player: P,
    config: SyncConfig,
    socket: Option<UdpSocket>,
    remote: Option<RemoteState>,
    window: DeviationWindow,
    rate: RateLevel,
    duration_gate: DurationGate,
    net_errors: u32,
    last_received: Option<Instant>,
    status: SyncStatus,
}

impl<P: Player> SyncController<P> {
    pub fn new(player: P, config: SyncConfig) -> Self {
        Self {
            player,
            config,
            socket: None,
            remote: None,
            window: DeviationWindow::new(),
            rate: RateLevel::Normal,
            duration_gate: DurationGate::Unknown,
            net_errors: 0,
            last_received: None,
            status: SyncStatus::default(),
        }
    }

    /// Open the inbound socket
    pub async fn setup(&mut self) -> Result<(), NetworkError> {
        let socket = network::open_listener_socket(&self.config).await?;
        self.socket = Some(socket);
        Ok(())
    }

    /// [`setup`](Self::setup) with the configured fixed-delay retries
    pub async fn setup_with_retry(&mut self) -> Result<(), NetworkError> {
        let config = self.config.clone();
        let socket = network::with_setup_retry(
            config.setup_retries,
            config.setup_retry_delay(),
            || network::open_listener_socket(&config),
        )
        .await?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Release the socket
    pub fn destroy(&mut self) {
        if self.socket.take().is_some() {
            debug!("Controller socket closed");
        }
    }

    /// Local address of the inbound socket, once set up
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn rate(&self) -> RateLevel {
        self.rate
    }

    pub fn remote(&self) -> Option<RemoteState> {
        self.remote
    }

    pub fn duration_gate(&self) -> DurationGate {
        self.duration_gate
    }

    /// Samples currently in the deviation window
    pub fn window(&self) -> &DeviationWindow {
        &self.window
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// More than [`MAX_CONSECUTIVE_NET_ERRORS`] bad datagrams in a row
    pub fn is_network_degraded(&self) -> bool {
        self.net_errors > MAX_CONSECUTIVE_NET_ERRORS
    }

    /// No valid datagram within `timeout` (or none ever)
    pub fn is_master_stale(&self, timeout: Duration) -> bool {
        self.last_received
            .map_or(true, |at| at.elapsed() > timeout)
    }

    /// One receive-evaluate-correct cycle.
    ///
    /// Reads at most one datagram from the socket. Only a fatal player error
    /// is returned; everything else is absorbed and reported in the outcome.
    pub async fn evaluate(&mut self) -> Result<SyncOutcome, PlayerError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let Some(socket) = self.socket.as_ref() else {
            return self.idle_check().await;
        };

        match socket.try_recv_from(&mut buf) {
            Ok((n, _from)) => self.process(&buf[..n]).await,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => self.idle_check().await,
            Err(e) => {
                self.record_net_error(&e);
                self.update_status(SyncOutcome::Malformed);
                Ok(SyncOutcome::Malformed)
            }
        }
    }

    /// Nothing received: poll the player so a lost control channel still ends the loop
    async fn idle_check(&self) -> Result<SyncOutcome, PlayerError> {
        self.player.playback_status().await?;
        Ok(SyncOutcome::NoData)
    }

    /// Evaluate one received datagram
    pub async fn process(&mut self, datagram: &[u8]) -> Result<SyncOutcome, PlayerError> {
        let outcome = match SyncMessage::decode(datagram) {
            Ok(message) => {
                self.net_errors = 0;
                self.last_received = Some(Instant::now());
                self.remote = Some(RemoteState::from(message));
                self.correct().await?
            }
            Err(e) => {
                self.record_net_error(&e);
                SyncOutcome::Malformed
            }
        };

        self.update_status(outcome);
        Ok(outcome)
    }

    fn record_net_error(&mut self, err: &dyn std::fmt::Display) {
        self.net_errors = self.net_errors.saturating_add(1);
        if self.net_errors == MAX_CONSECUTIVE_NET_ERRORS + 1 {
            error!("Network is unreachable or master is sending garbage: {}", err);
        } else {
            debug!("Unusable datagram ({} in a row): {}", self.net_errors, err);
        }
    }

    /// Read the local player; `None` if it cannot report position or status yet
    async fn snapshot(&self) -> Result<Option<LocalSnapshot>, PlayerError> {
        let Some(position) = self.player.position().await? else {
            return Ok(None);
        };
        let Some(status) = self.player.playback_status().await? else {
            return Ok(None);
        };
        let duration = self.player.duration().await?;
        Ok(Some(LocalSnapshot {
            position,
            duration,
            status,
        }))
    }

    /// Decide and apply a correction against the current remote state
    async fn correct(&mut self) -> Result<SyncOutcome, PlayerError> {
        let Some(remote) = self.remote else {
            return Ok(SyncOutcome::NoData);
        };
        let Some(local) = self.snapshot().await? else {
            return Ok(SyncOutcome::NotReady);
        };

        if local.status != remote.status {
            info!("Master is {}, local player is {}; following", remote.status, local.status);
            self.player.set_playback_status(remote.status).await?;
        }

        if remote.status != PlaybackStatus::Playing {
            return Ok(SyncOutcome::Idle);
        }

        let deviation = remote.position - local.position;
        self.status.deviation = Some(deviation);

        if !self.check_duration(remote.duration, local.duration) {
            return Ok(SyncOutcome::DurationMismatch);
        }

        self.window.push(deviation);
        let median = self.window.median().unwrap_or(deviation);
        self.status.median_deviation = Some(median);

        debug!(
            "Master: {:.2}/{:.2} (deviation: {:+.3}, median: {:+.3}, {}, rate: {:?})",
            remote.position, remote.duration, deviation, median, local.status, self.rate
        );

        // Near start or end of media corrections only cause trouble
        if remote.position <= self.config.grace_time
            || (remote.duration - local.position) < self.config.grace_time
        {
            self.reset_rate().await?;
            return Ok(SyncOutcome::GraceZone);
        }

        if median.abs() <= self.config.tolerance {
            self.reset_rate().await?;
            return Ok(SyncOutcome::InSync);
        }

        // Decisions after a correction must only use fresh evidence
        self.window.clear();

        if median.abs() >= self.config.big_tolerance {
            let target = remote.position + self.config.jump_ahead;
            info!(
                "Deviation {:+.3}s too large, jumping to {:.2} (master at {:.2})",
                median, target, remote.position
            );
            self.player.set_position(target).await?;
            return Ok(SyncOutcome::HardCorrection { target });
        }

        let step = if deviation < 0.0 {
            Some(SpeedStep::SlowDown)
        } else if deviation > 0.0 {
            Some(SpeedStep::SpeedUp)
        } else {
            None
        };
        let applied = match step.and_then(|s| self.rate.stepped(s).map(|level| (s, level))) {
            Some((step, level)) => {
                debug!("Deviation {:+.3}s, {:?} to {:?}", median, step, level);
                self.player.apply_speed_step(step).await?;
                self.rate = level;
                Some(step)
            }
            None => None,
        };

        Ok(SyncOutcome::SoftCorrection {
            step: applied,
            level: self.rate,
        })
    }

    /// Check master and local media are the same length, until they match once
    fn check_duration(&mut self, remote: f64, local: Option<f64>) -> bool {
        if self.duration_gate.is_matched() {
            return true;
        }

        let Some(local) = local else {
            debug!("Local duration not available yet, withholding sync");
            return false;
        };

        if (remote - local).abs() > DURATION_MATCH_TOLERANCE {
            let gate = DurationGate::Mismatched { remote, local };
            if self.duration_gate != gate {
                error!(
                    "Durations of files do not match! Master: {:.2}s, slave: {:.2}s",
                    remote, local
                );
            }
            self.duration_gate = gate;
            return false;
        }

        info!("Media durations match ({:.2}s), sync enabled", local);
        self.duration_gate = DurationGate::Matched;
        true
    }

    /// Undo an active soft correction with one compensating step
    async fn reset_rate(&mut self) -> Result<(), PlayerError> {
        if let Some(step) = self.rate.reset_step() {
            debug!("Resetting playback rate from {:?}", self.rate);
            self.player.apply_speed_step(step).await?;
            self.rate = RateLevel::Normal;
        }
        Ok(())
    }

    fn update_status(&mut self, outcome: SyncOutcome) {
        self.status.remote = self.remote;
        self.status.rate = self.rate;
        self.status.duration_gate = self.duration_gate;
        self.status.network_degraded = self.is_network_degraded();
        self.status.last_outcome = outcome;
    }

    /// Evaluate until the player's control channel fails or `cancel` fires.
    ///
    /// Status changes are published on `status_tx`. The socket is released on exit.
    pub async fn run(
        mut self,
        mut cancel: oneshot::Receiver<()>,
        status_tx: watch::Sender<SyncStatus>,
    ) -> Result<(), PlayerError> {
        info!("Sync controller loop started");
        let poll = self.config.poll_interval();

        let result = loop {
            if is_cancelled(&mut cancel) {
                info!("Sync controller loop cancelled");
                break Ok(());
            }

            match self.evaluate().await {
                Ok(SyncOutcome::NoData) => {}
                Ok(_) => {
                    status_tx.send_if_modified(|current| {
                        if *current != self.status {
                            *current = self.status.clone();
                            true
                        } else {
                            false
                        }
                    });
                }
                Err(e) if e.is_fatal() => {
                    warn!("Player control channel lost, ending sync loop: {}", e);
                    break Err(e);
                }
                Err(e) => warn!("Player command failed: {}", e),
            }

            tokio::time::sleep(poll).await;
        };

        self.destroy();
        info!("Sync controller loop ended");
        result
    }
}

/// Handle to a running controller
pub struct SyncHandle {
    task: TaskHandle,
    status: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Watch the controller's status
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn shutdown(&mut self) {
        self.task.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<(), PlayerError> {
        self.task.join().await
    }

    pub async fn stop(self) -> Result<(), PlayerError> {
        self.task.stop().await
    }
}

impl<P: Player + 'static> SyncController<P> {
    /// Run the loop on its own tokio task
    pub fn spawn(self) -> SyncHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(self.status.clone());
        let join = tokio::spawn(self.run(cancel_rx, status_tx));
        SyncHandle {
            task: TaskHandle::new(cancel_tx, join),
            status: status_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{PlayerCommand, SimulatedPlayer};
    use crate::sync::encode;
    use std::net::Ipv4Addr;

    fn datagram(position: f64, duration: f64, status: PlaybackStatus) -> Vec<u8> {
        encode(position, duration, status)
    }

    fn playing(position: f64) -> SimulatedPlayer {
        SimulatedPlayer::with_state(100.0, position, PlaybackStatus::Playing)
    }

    fn controller(player: &SimulatedPlayer) -> SyncController<SimulatedPlayer> {
        SyncController::new(player.clone(), SyncConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_deviation_seeks_ahead() {
        let player = playing(46.5);
        let mut ctrl = controller(&player);

        let outcome = ctrl
            .process(&datagram(50.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::HardCorrection { target: 51.0 });
        assert_eq!(player.commands(), vec![PlayerCommand::Seek(51.0)]);
        assert!(ctrl.window().is_empty());
        assert_eq!(ctrl.rate(), RateLevel::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_deviation_behind_speeds_up() {
        // Master 50.2, slave 50.1: slave is behind
        let player = playing(50.1);
        let mut ctrl = controller(&player);

        let outcome = ctrl
            .process(&datagram(50.2, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::SoftCorrection {
                step: Some(SpeedStep::SpeedUp),
                level: RateLevel::Fast
            }
        );
        assert_eq!(player.commands(), vec![PlayerCommand::Speed(SpeedStep::SpeedUp)]);
        assert!(ctrl.window().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_deviation_ahead_slows_down() {
        // Master 50.1, slave 50.2: slave is ahead
        let player = playing(50.2);
        let mut ctrl = controller(&player);

        ctrl.process(&datagram(50.1, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(player.commands(), vec![PlayerCommand::Speed(SpeedStep::SlowDown)]);
        assert_eq!(ctrl.rate(), RateLevel::Slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerance_boundary() {
        let config = SyncConfig {
            tolerance: 0.25,
            ..SyncConfig::default()
        };

        // Exactly at tolerance: no correction
        let player = playing(10.0);
        let mut ctrl = SyncController::new(player.clone(), config.clone());
        let outcome = ctrl
            .process(&datagram(10.25, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::InSync);
        assert!(player.commands().is_empty());

        // Just above tolerance: correction
        let player = playing(10.0);
        let mut ctrl = SyncController::new(player.clone(), config);
        let outcome = ctrl
            .process(&datagram(10.2500001, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::SoftCorrection { .. }));
        assert_eq!(player.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_is_gradual_and_bounded() {
        let player = playing(20.0);
        let mut ctrl = controller(&player);

        // Sustained deviation just under big tolerance
        for _ in 0..12 {
            player.jump_to(20.0);
            let outcome = ctrl
                .process(&datagram(22.9, 100.0, PlaybackStatus::Playing))
                .await
                .unwrap();
            assert!(matches!(outcome, SyncOutcome::SoftCorrection { level: RateLevel::Fast, .. }));
            assert!(ctrl.window().is_empty());
        }
        // Only one step was ever applied
        assert_eq!(player.commands(), vec![PlayerCommand::Speed(SpeedStep::SpeedUp)]);

        // Crossing big tolerance seeks instead
        player.jump_to(20.0);
        let outcome = ctrl
            .process(&datagram(23.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::HardCorrection { target: 24.0 });
        assert!(ctrl.window().is_empty());
        // The seek does not consume the rate step
        assert_eq!(ctrl.rate(), RateLevel::Fast);
    }

    #[tokio::test(start_paused = true)]
    async fn test_median_filters_single_spike() {
        let player = playing(30.0);
        let mut ctrl = controller(&player);

        for position in [30.01, 30.0, 29.99] {
            player.jump_to(30.0);
            let outcome = ctrl
                .process(&datagram(position, 100.0, PlaybackStatus::Playing))
                .await
                .unwrap();
            assert_eq!(outcome, SyncOutcome::InSync);
        }

        // One late datagram far off does not move the median past tolerance
        player.jump_to(30.0);
        let outcome = ctrl
            .process(&datagram(30.5, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::InSync);
        assert!(player.commands().is_empty());
        assert_eq!(ctrl.window().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_zone_at_start() {
        let player = playing(0.5);
        let mut ctrl = controller(&player);

        let outcome = ctrl
            .process(&datagram(2.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::GraceZone);
        assert!(player.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_zone_at_end_resets_rate() {
        let player = playing(50.0);
        let mut ctrl = controller(&player);

        ctrl.process(&datagram(50.5, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(ctrl.rate(), RateLevel::Fast);

        player.jump_to(98.0);
        let outcome = ctrl
            .process(&datagram(98.5, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::GraceZone);
        assert_eq!(ctrl.rate(), RateLevel::Normal);
        assert_eq!(
            player.commands(),
            vec![
                PlayerCommand::Speed(SpeedStep::SpeedUp),
                PlayerCommand::Speed(SpeedStep::SlowDown),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_zone_at_start_resets_rate() {
        let player = playing(50.0);
        let mut ctrl = controller(&player);

        ctrl.process(&datagram(50.5, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(ctrl.rate(), RateLevel::Fast);

        // Master restarted the media
        player.jump_to(1.0);
        let outcome = ctrl
            .process(&datagram(2.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::GraceZone);
        assert_eq!(ctrl.rate(), RateLevel::Normal);
        assert_eq!(
            player.commands(),
            vec![
                PlayerCommand::Speed(SpeedStep::SpeedUp),
                PlayerCommand::Speed(SpeedStep::SlowDown),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_in_tolerance_resets_rate() {
        let player = playing(40.0);
        let mut ctrl = controller(&player);

        ctrl.process(&datagram(39.5, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(ctrl.rate(), RateLevel::Slow);

        player.jump_to(40.0);
        let outcome = ctrl
            .process(&datagram(40.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::InSync);
        assert_eq!(ctrl.rate(), RateLevel::Normal);
        assert_eq!(
            player.commands().last(),
            Some(&PlayerCommand::Speed(SpeedStep::SpeedUp))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_mismatch_sets_state_once() {
        let player = playing(40.0);
        let mut ctrl = controller(&player);

        let outcome = ctrl
            .process(&datagram(45.0, 100.0, PlaybackStatus::Paused))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Idle);
        assert_eq!(
            player.commands(),
            vec![PlayerCommand::SetStatus(PlaybackStatus::Paused)]
        );
        assert!(ctrl.window().is_empty());

        // Already paused: nothing more to do
        ctrl.process(&datagram(45.0, 100.0, PlaybackStatus::Paused))
            .await
            .unwrap();
        assert_eq!(player.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_when_master_plays() {
        let player = SimulatedPlayer::with_state(100.0, 40.0, PlaybackStatus::Paused);
        let mut ctrl = controller(&player);

        ctrl.process(&datagram(40.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();

        assert_eq!(
            player.commands(),
            vec![PlayerCommand::SetStatus(PlaybackStatus::Playing)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_mismatch_withholds_sync() {
        let player = playing(46.5);
        let mut ctrl = controller(&player);

        for _ in 0..3 {
            let outcome = ctrl
                .process(&datagram(50.0, 200.0, PlaybackStatus::Playing))
                .await
                .unwrap();
            assert_eq!(outcome, SyncOutcome::DurationMismatch);
        }
        assert!(player.commands().is_empty());
        assert!(ctrl.window().is_empty());
        assert!(matches!(ctrl.duration_gate(), DurationGate::Mismatched { .. }));

        // Within one second counts as the same media
        let outcome = ctrl
            .process(&datagram(50.0, 100.5, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::HardCorrection { target: 51.0 });
        assert_eq!(ctrl.duration_gate(), DurationGate::Matched);

        // Once matched the check is not repeated
        player.jump_to(60.0);
        let outcome = ctrl
            .process(&datagram(60.0, 300.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::InSync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_player_is_noop() {
        let player = playing(10.0);
        player.set_ready(false);
        let mut ctrl = controller(&player);

        let outcome = ctrl
            .process(&datagram(50.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::NotReady);
        assert!(player.commands().is_empty());
        // The remote state is still recorded
        assert_eq!(ctrl.remote().map(|r| r.position), Some(50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_datagrams_degrade_network() {
        let player = playing(10.0);
        let mut ctrl = controller(&player);

        for _ in 0..MAX_CONSECUTIVE_NET_ERRORS {
            let outcome = ctrl.process(b"garbage").await.unwrap();
            assert_eq!(outcome, SyncOutcome::Malformed);
        }
        assert!(!ctrl.is_network_degraded());

        ctrl.process(b"10%100").await.unwrap();
        assert!(ctrl.is_network_degraded());
        assert!(ctrl.status().network_degraded);

        // A good datagram clears the condition
        ctrl.process(&datagram(10.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert!(!ctrl.is_network_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_player_is_fatal() {
        let player = playing(10.0);
        player.disconnect();
        let mut ctrl = controller(&player);

        let err = ctrl
            .process(&datagram(50.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_staleness() {
        let player = playing(10.0);
        let mut ctrl = controller(&player);
        assert!(ctrl.is_master_stale(Duration::from_secs(5)));

        ctrl.process(&datagram(10.0, 100.0, PlaybackStatus::Playing))
            .await
            .unwrap();
        assert!(!ctrl.is_master_stale(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctrl.is_master_stale(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_evaluate_without_data() {
        let player = playing(10.0);
        let config = SyncConfig {
            host: Some(Ipv4Addr::LOCALHOST),
            port: 0,
            ..SyncConfig::default()
        };
        let mut ctrl = SyncController::new(player, config);
        ctrl.setup().await.unwrap();

        assert_eq!(ctrl.evaluate().await.unwrap(), SyncOutcome::NoData);
    }

    #[tokio::test]
    async fn test_evaluate_drains_one_datagram_per_cycle() {
        let player = playing(46.5);
        let config = SyncConfig {
            host: Some(Ipv4Addr::LOCALHOST),
            port: 0,
            ..SyncConfig::default()
        };
        let mut ctrl = SyncController::new(player.clone(), config);
        ctrl.setup().await.unwrap();
        let addr = ctrl.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&datagram(50.0, 100.0, PlaybackStatus::Playing), addr)
            .await
            .unwrap();
        sender.send_to(b"broken", addr).await.unwrap();

        // Wait for both datagrams to land in the socket buffer
        let mut first = SyncOutcome::NoData;
        for _ in 0..100 {
            first = ctrl.evaluate().await.unwrap();
            if first != SyncOutcome::NoData {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(first, SyncOutcome::HardCorrection { .. }));

        let mut second = SyncOutcome::NoData;
        for _ in 0..100 {
            second = ctrl.evaluate().await.unwrap();
            if second != SyncOutcome::NoData {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(second, SyncOutcome::Malformed);
    }

    async fn loopback_controller(
        player: &SimulatedPlayer,
    ) -> (SyncController<SimulatedPlayer>, SyncConfig) {
        let config = SyncConfig {
            host: Some(Ipv4Addr::LOCALHOST),
            port: 0,
            ..SyncConfig::default()
        };
        let mut ctrl = SyncController::new(player.clone(), config.clone());
        ctrl.setup().await.unwrap();
        let port = ctrl.local_addr().unwrap().port();
        (ctrl, SyncConfig { port, ..config })
    }

    #[tokio::test]
    async fn test_publisher_to_controller() {
        use crate::publisher::{Publisher, TickOutcome};

        let master = playing(50.0);
        let slave = playing(46.5);
        let (mut ctrl, config) = loopback_controller(&slave).await;

        let mut publisher = Publisher::new(master, config);
        publisher.setup().await.unwrap();
        assert!(matches!(
            publisher.tick(Instant::now()).await.unwrap(),
            TickOutcome::Sent(_)
        ));

        let mut outcome = SyncOutcome::NoData;
        for _ in 0..100 {
            outcome = ctrl.evaluate().await.unwrap();
            if outcome != SyncOutcome::NoData {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let SyncOutcome::HardCorrection { target } = outcome else {
            panic!("expected a seek, got {outcome:?}");
        };
        assert!((target - 51.0).abs() < 0.5);
        assert!(matches!(slave.commands().as_slice(), [PlayerCommand::Seek(_)]));
        assert_eq!(ctrl.status().last_outcome, outcome);
    }

    #[tokio::test]
    async fn test_run_loop_ends_on_disconnect() {
        let player = playing(46.5);
        let (ctrl, config) = loopback_controller(&player).await;
        let handle = ctrl.spawn();
        let status = handle.status();

        player.disconnect();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&datagram(50.0, 100.0, PlaybackStatus::Playing), config.listen_addr())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .expect("controller loop did not end");
        assert!(result.unwrap_err().is_fatal());
        // No cycle completed, so nothing was published
        assert_eq!(status.borrow().last_outcome, SyncOutcome::NoData);
    }

    #[tokio::test]
    async fn test_run_loop_ends_on_disconnect_without_traffic() {
        let player = playing(46.5);
        let (ctrl, _config) = loopback_controller(&player).await;
        let handle = ctrl.spawn();

        player.disconnect();

        let result = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("controller loop did not end");
        assert!(result.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_evaluate_without_data_reports_disconnect() {
        let player = playing(10.0);
        let (mut ctrl, _config) = loopback_controller(&player).await;
        player.disconnect();

        let err = ctrl.evaluate().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ctrl.status().last_outcome, SyncOutcome::NoData);
        assert!(player.commands().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_publishes_status() {
        let player = playing(46.5);
        let (ctrl, config) = loopback_controller(&player).await;
        let mut handle = ctrl.spawn();
        let mut status = handle.status();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&datagram(50.0, 100.0, PlaybackStatus::Playing), config.listen_addr())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), status.changed())
            .await
            .expect("no status update")
            .unwrap();
        assert!(matches!(
            status.borrow().last_outcome,
            SyncOutcome::HardCorrection { .. }
        ));

        handle.shutdown();
        handle.join().await.unwrap();
    }
}
