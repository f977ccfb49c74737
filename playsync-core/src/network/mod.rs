//! UDP Networking
//!
//! Socket setup for both roles. The publisher gets a connected socket that
//! can broadcast or multicast, the controller gets a non-blocking listener.

mod socket;

use std::net::SocketAddrV4;
use thiserror::Error;

pub use socket::{open_listener_socket, open_publisher_socket, with_setup_retry, Interface};

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("Network is unreachable ({addr}): {source}")]
    Unreachable {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("Interface {name} unavailable: {source}")]
    Interface {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Binding to a named interface is not supported on this platform: {0}")]
    InterfaceUnsupported(String),

    #[error("Socket option failed: {0}")]
    SocketOption(#[source] std::io::Error),

    #[error("Send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("Socket not set up")]
    NotConnected,
}
