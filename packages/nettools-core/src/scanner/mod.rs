//! Host probing collaborators.
//!
//! Each external lookup the engines depend on sits behind a small trait so the
//! discovery sweep and the monitor can run against the real system tools or
//! against in-process fakes:
//! - [`Prober`]: one reachability probe with a timeout (system `ping`)
//! - [`HardwareResolver`]: IP -> MAC via the neighbour/ARP table
//! - [`VendorLookup`]: MAC -> manufacturer via the IEEE OUI database
//! - [`NameResolver`]: reverse name lookup with address fallback

mod arp;
mod hostname;
pub mod interfaces;
mod mac;
mod oui;
mod ping;
pub mod privileges;

pub use arp::ArpResolver;
pub use hostname::SystemNameResolver;
pub use mac::HardwareAddress;
pub use oui::{OuiVendors, lookup_vendor};
pub use ping::SystemPing;
pub use privileges::ScanCapabilities;

use crate::error::Result;
use crate::ipcalc::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows and is killed
/// when its future is dropped (for example by an elapsed timeout).
pub(crate) fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Outcome of one reachability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub host: String,
    pub alive: bool,
    pub rtt_millis: Option<f64>,
}

impl ProbeResult {
    pub fn alive(host: impl Into<String>, rtt_millis: Option<f64>) -> Self {
        Self {
            host: host.into(),
            alive: true,
            rtt_millis,
        }
    }

    pub fn dead(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            alive: false,
            rtt_millis: None,
        }
    }
}

/// Issues a single reachability probe.
///
/// An unreachable host is `Ok` with `alive == false`; errors are reserved for
/// probes that could not run or did not finish in time.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &str, timeout: Duration) -> Result<ProbeResult>;
}

#[async_trait]
pub trait HardwareResolver: Send + Sync {
    async fn resolve_hardware_address(&self, ip: Address) -> Option<HardwareAddress>;
}

pub trait VendorLookup: Send + Sync {
    fn vendor_for(&self, mac: &HardwareAddress) -> Option<String>;
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Human readable name for `ip`; the address itself when nothing resolves.
    async fn resolve_name(&self, ip: Address) -> String;
}
