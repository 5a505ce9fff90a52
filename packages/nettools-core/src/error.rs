//! Error kinds surfaced by the core library.

use thiserror::Error;

/// Errors produced by the address arithmetic, probes and device management.
///
/// `InvalidFormat` and `InvalidRange` are caller errors and are never retried.
/// Probe and resolution failures are transient; the monitor and discovery
/// engines absorb them per unit of work instead of propagating them.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid range: end {end} precedes start {start}")]
    InvalidRange { start: String, end: String },

    #[error("probe of {0} timed out")]
    ProbeTimeout(String),

    #[error("probe of {host} failed: {reason}")]
    ProbeFailure { host: String, reason: String },

    #[error("could not resolve {what} for {target}")]
    ResolutionFailure { what: &'static str, target: String },

    #[error("wake packet to {mac} failed after {attempts} attempts: {reason}")]
    WakeFailure {
        mac: String,
        attempts: u32,
        reason: String,
    },

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("hardware address {mac} already belongs to device {existing}")]
    HardwareAddressInUse { mac: String, existing: String },

    #[error("registry error: {0:#}")]
    Registry(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub(crate) fn invalid_format(what: impl std::fmt::Display) -> Self {
        NetError::InvalidFormat(what.to_string())
    }

    /// Transient errors are absorbed by retry policies rather than surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetError::ProbeTimeout(_)
                | NetError::ProbeFailure { .. }
                | NetError::ResolutionFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
