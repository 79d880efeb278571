//! Motion-platform output.
//!
//! The dispatch loop only ever talks to the [`Platform`] trait, so the UDP
//! driver can be swapped for a recorder in tests or another link later.
//!
//! # Wire record
//!
//! One UTF-8 datagram per command, field order fixed:
//!
//! ```text
//! {"acceleration_x": 0.3, "acceleration_y": 0.875, "acceleration_z": 0.0, "rpm": 3840.0}
//! ```
//!
//! Floats use the shortest text that reads back to the same value.  Tiny and
//! huge magnitudes switch to exponent form without zero padding (`1e-5`, not
//! `1e-05`); both spellings parse to the same float on the receiving side.
//! No acknowledgement or retry; the next tick supersedes a lost datagram.

use std::net::SocketAddr;

use async_trait::async_trait;
use tiltbridge_types::{BridgeError, PlatformCommand};
use tokio::net::UdpSocket;
use tracing::{info, trace};

/// Default platform destination host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default platform destination port.
pub const DEFAULT_PORT: u16 = 40000;

/// A motion platform that accepts [`PlatformCommand`]s.
#[async_trait]
pub trait Platform: Send {
    /// Human-readable destination, for logs.
    fn destination(&self) -> String;

    /// Transmit one command.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] if the command could not be handed to the
    /// link.  Callers treat this as non-fatal.
    async fn send(&mut self, command: &PlatformCommand) -> Result<(), BridgeError>;
}

/// Serialise `command` into the platform's wire record.
pub fn encode_command(command: &PlatformCommand) -> String {
    format!(
        "{{\"acceleration_x\": {:?}, \"acceleration_y\": {:?}, \"acceleration_z\": {:?}, \"rpm\": {:?}}}",
        command.acc_x, command.acc_y, command.acc_z, command.rpm
    )
}

/// Best-effort UDP link to the platform controller.
pub struct UdpPlatform {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpPlatform {
    /// Resolve `host:port` once and bind an ephemeral local socket.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] when the host does not resolve or no local
    /// socket can be bound.
    pub async fn connect(host: &str, port: u16) -> Result<Self, BridgeError> {
        let destination = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| BridgeError::Transport(format!("cannot resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| BridgeError::Transport(format!("{host}:{port} resolved to nothing")))?;

        let local: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| BridgeError::Transport(format!("cannot bind UDP socket: {e}")))?;

        info!(%destination, "platform link ready");
        Ok(Self {
            socket,
            destination,
        })
    }
}

#[async_trait]
impl Platform for UdpPlatform {
    fn destination(&self) -> String {
        self.destination.to_string()
    }

    async fn send(&mut self, command: &PlatformCommand) -> Result<(), BridgeError> {
        let record = encode_command(command);
        let sent = self
            .socket
            .send_to(record.as_bytes(), self.destination)
            .await
            .map_err(|e| BridgeError::Transport(format!("send to {} failed: {e}", self.destination)))?;
        if sent != record.len() {
            return Err(BridgeError::Transport(format!(
                "datagram truncated: {sent} of {} bytes",
                record.len()
            )));
        }
        trace!(destination = %self.destination, %record, "command sent");
        Ok(())
    }
}
