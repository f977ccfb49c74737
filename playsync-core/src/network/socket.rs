//! Socket setup for publisher and controller

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, info, instrument, warn};

use super::NetworkError;
use crate::config::{SyncConfig, TransportMode};

/// Network interface selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interface {
    /// Local IPv4 address of the interface
    Addr(Ipv4Addr),
    /// Device name such as `eth0` (Linux only)
    Device(String),
}

impl Interface {
    /// Interpret a configured interface string
    pub fn parse(value: &str) -> Self {
        match value.parse::<Ipv4Addr>() {
            Ok(addr) => Interface::Addr(addr),
            Err(_) => Interface::Device(value.to_string()),
        }
    }

    fn local_addr(&self) -> Ipv4Addr {
        match self {
            Interface::Addr(addr) => *addr,
            Interface::Device(_) => Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Open the publisher's outbound socket, connected to the configured destination
#[instrument(skip(config), fields(mode = ?config.mode, dest = %config.publish_addr()))]
pub async fn open_publisher_socket(config: &SyncConfig) -> Result<UdpSocket, NetworkError> {
    let interface = config.interface.as_deref().map(Interface::parse);
    let local = SocketAddrV4::new(
        interface.as_ref().map_or(Ipv4Addr::UNSPECIFIED, Interface::local_addr),
        0,
    );

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|source| NetworkError::Bind { addr: local, source })?;

    if let Some(Interface::Device(name)) = &interface {
        bind_device(&socket, name)?;
    }

    match config.mode {
        TransportMode::Broadcast => {
            socket.set_broadcast(true).map_err(NetworkError::SocketOption)?;
        }
        TransportMode::Multicast => {
            socket
                .set_multicast_ttl_v4(config.multicast_ttl)
                .map_err(NetworkError::SocketOption)?;
            // Slaves on the same host should hear us too
            socket
                .set_multicast_loop_v4(true)
                .map_err(NetworkError::SocketOption)?;
        }
    }

    let dest = config.publish_addr();
    socket
        .connect(dest)
        .await
        .map_err(|source| NetworkError::Unreachable { addr: dest, source })?;

    info!("Publisher socket ready ({:?} to {})", config.mode, dest);
    Ok(socket)
}

/// Open the controller's inbound socket
#[instrument(skip(config), fields(mode = ?config.mode, addr = %config.listen_addr()))]
pub async fn open_listener_socket(config: &SyncConfig) -> Result<UdpSocket, NetworkError> {
    let interface = config.interface.as_deref().map(Interface::parse);
    let addr = config.listen_addr();

    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| NetworkError::Bind { addr, source })?;

    if let Some(Interface::Device(name)) = &interface {
        bind_device(&socket, name)?;
    }

    if config.mode == TransportMode::Multicast {
        let group = config.multicast_group();
        let iface = interface.as_ref().map_or(Ipv4Addr::UNSPECIFIED, Interface::local_addr);
        socket
            .join_multicast_v4(group, iface)
            .map_err(|source| NetworkError::Interface {
                name: iface.to_string(),
                source,
            })?;
        debug!("Joined multicast group {} on {}", group, iface);
    }

    info!("Listening for sync messages on {}", addr);
    Ok(socket)
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_device(socket: &UdpSocket, name: &str) -> Result<(), NetworkError> {
    socket
        .bind_device(Some(name.as_bytes()))
        .map_err(|source| NetworkError::Interface {
            name: name.to_string(),
            source,
        })
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_device(_socket: &UdpSocket, name: &str) -> Result<(), NetworkError> {
    Err(NetworkError::InterfaceUnsupported(name.to_string()))
}

/// Run a socket setup step up to `attempts` times with a fixed `delay` between tries.
///
/// Every failure is logged; the last one is returned if all attempts fail.
pub async fn with_setup_retry<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut setup: F,
) -> Result<T, NetworkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NetworkError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match setup().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    "Socket setup failed (attempt {}/{}): {}, retrying in {:?}",
                    attempt, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("Socket setup failed after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}
