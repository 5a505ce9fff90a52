//! Wake-on-LAN
//!
//! A magic packet is six `0xFF` bytes followed by the target hardware address
//! repeated sixteen times, sent over UDP either to the limited broadcast
//! address or directly to the device's last known IP.

use crate::error::{NetError, Result};
use crate::ipcalc::Address;
use crate::scanner::HardwareAddress;
use async_trait::async_trait;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

pub const MAGIC_PACKET_LEN: usize = 102;
pub const WAKE_PORT: u16 = 9;
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(750);

/// Build the magic packet for `mac`.
pub fn magic_packet(mac: &HardwareAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFF; MAGIC_PACKET_LEN];
    let octets = mac.octets();
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&octets);
    }
    packet
}

/// Sends one datagram.
#[async_trait]
pub trait WakeTransport: Send + Sync {
    async fn send(&self, packet: &[u8], destination: Ipv4Addr) -> std::io::Result<()>;
}

/// [`WakeTransport`] over a fresh broadcast-enabled UDP socket per send.
#[derive(Debug, Clone, Copy)]
pub struct UdpWakeTransport {
    port: u16,
}

impl UdpWakeTransport {
    pub fn new() -> Self {
        Self::with_port(WAKE_PORT)
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for UdpWakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WakeTransport for UdpWakeTransport {
    async fn send(&self, packet: &[u8], destination: Ipv4Addr) -> std::io::Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let sent = socket
            .send_to(packet, SocketAddrV4::new(destination, self.port))
            .await?;
        if sent != packet.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", packet.len()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WakeOutcome {
    Sent { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

impl WakeOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, WakeOutcome::Sent { .. })
    }

    /// Attempts taken on success, `WakeFailure` naming `target` otherwise.
    pub fn into_result(self, target: impl std::fmt::Display) -> Result<u32> {
        match self {
            WakeOutcome::Sent { attempts } => Ok(attempts),
            WakeOutcome::Failed { attempts, reason } => Err(NetError::WakeFailure {
                mac: target.to_string(),
                attempts,
                reason,
            }),
        }
    }
}

/// Sends wake packets with bounded retry and a fixed delay between attempts.
#[derive(Clone)]
pub struct WakeSender {
    transport: Arc<dyn WakeTransport>,
    max_attempts: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl WakeSender {
    pub fn new(transport: Arc<dyn WakeTransport>) -> Self {
        Self {
            transport,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Wake `mac`, directed at `target_ip` when `use_target_ip` is set and an
    /// IP is known, broadcast otherwise.
    ///
    /// Exhausting the attempts is reported in the outcome, never as an error.
    pub async fn wake(
        &self,
        mac: &HardwareAddress,
        use_target_ip: bool,
        target_ip: Option<Address>,
    ) -> WakeOutcome {
        let destination = match target_ip {
            Some(ip) if use_target_ip => Ipv4Addr::from(ip),
            _ => Ipv4Addr::BROADCAST,
        };
        let packet = magic_packet(mac);

        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts < self.max_attempts {
            if attempts > 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return WakeOutcome::Failed {
                            attempts,
                            reason: "cancelled".to_string(),
                        };
                    }
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
            attempts += 1;

            match self.transport.send(&packet, destination).await {
                Ok(()) => {
                    tracing::info!("Sent wake packet to {} via {}", mac, destination);
                    return WakeOutcome::Sent { attempts };
                }
                Err(e) => {
                    tracing::debug!("Wake attempt {} for {} failed: {}", attempts, mac, e);
                    last_error = e.to_string();
                }
            }
        }

        tracing::warn!(
            "Giving up waking {} after {} attempts: {}",
            mac,
            attempts,
            last_error
        );
        WakeOutcome::Failed {
            attempts,
            reason: last_error,
        }
    }
}
