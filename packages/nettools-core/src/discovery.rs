//! Discovery sweep
//!
//! Probes every address of a range in fixed-size windows and reconciles the
//! responders against the device registry:
//! - a responder whose hardware address is already registered only gets its
//!   IP and vendor refreshed, and only when the IP changed
//! - an unknown hardware address is registered as a new enabled device unless
//!   it is on the ignore list
//! - a responder whose hardware address cannot be resolved is skipped
//!
//! Windows are strictly sequential and a window completes only when all of
//! its probes have settled.

use crate::error::Result;
use crate::ipcalc::{Address, AddressRange};
use crate::registry::{
    DEFAULT_PING_INTERVAL_SECS, DeviceKey, DevicePatch, DeviceRecord, DeviceRegistry, IgnoreList,
};
use crate::scanner::{
    ArpResolver, HardwareAddress, HardwareResolver, NameResolver, OuiVendors, Prober,
    SystemNameResolver, SystemPing, VendorLookup,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_WINDOW: usize = 10;
pub const DEFAULT_TIMEOUT_FRACTION: f64 = 0.5;

/// Tuning of one sweep.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Addresses probed concurrently.
    pub window: usize,
    pub probe_timeout: Duration,
    /// Settings given to newly registered devices.
    pub ping_interval_secs: u64,
    pub retries: u32,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            probe_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_FRACTION),
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            retries: 0,
        }
    }
}

impl DiscoveryOptions {
    /// Probe timeout as a fraction of a second, kept within (0, 1).
    pub fn with_timeout_fraction(mut self, fraction: f64) -> Self {
        let fraction = if fraction > 0.0 && fraction < 1.0 {
            fraction
        } else {
            DEFAULT_TIMEOUT_FRACTION
        };
        self.probe_timeout = Duration::from_secs_f64(fraction);
        self
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub scanned: u64,
    pub responders: usize,
    pub registered: Vec<DeviceRecord>,
    pub updated: Vec<DeviceRecord>,
    pub cancelled: bool,
}

/// An alive host with a resolved hardware address.
#[derive(Debug, Clone)]
struct Sighting {
    ip: Address,
    mac: HardwareAddress,
    vendor: Option<String>,
    name: String,
}

/// Discovery engine over injectable collaborators.
#[derive(Clone)]
pub struct Discovery {
    prober: Arc<dyn Prober>,
    hardware: Arc<dyn HardwareResolver>,
    vendors: Arc<dyn VendorLookup>,
    names: Arc<dyn NameResolver>,
    options: DiscoveryOptions,
    cancel: CancellationToken,
}

impl Discovery {
    pub fn new(
        prober: Arc<dyn Prober>,
        hardware: Arc<dyn HardwareResolver>,
        vendors: Arc<dyn VendorLookup>,
        names: Arc<dyn NameResolver>,
    ) -> Self {
        Self {
            prober,
            hardware,
            vendors,
            names,
            options: DiscoveryOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Engine backed by the system ping, ARP cache, OUI database and resolver.
    pub fn system() -> Self {
        Self::new(
            Arc::new(SystemPing),
            Arc::new(ArpResolver),
            Arc::new(OuiVendors),
            Arc::new(SystemNameResolver),
        )
    }

    pub fn with_options(mut self, options: DiscoveryOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop the sweep when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Sweep `range` and register new devices in `registry`.
    ///
    /// The registry is read once at the start; devices registered during the
    /// sweep join that snapshot so a hardware address seen twice is only
    /// registered once.
    pub async fn discover(
        &self,
        range: &AddressRange,
        ignore: &IgnoreList,
        registry: &dyn DeviceRegistry,
    ) -> Result<DiscoveryReport> {
        let started = Instant::now();
        let mut known = registry.list().await?;
        let mut report = DiscoveryReport::default();
        let window_size = self.options.window.max(1);

        tracing::info!(
            "Discovery of {} ({} addresses, {} known devices)",
            range,
            range.len(),
            known.len()
        );

        let mut addresses = range.iter();
        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let window: Vec<Address> = addresses.by_ref().take(window_size).collect();
            if window.is_empty() {
                break;
            }
            report.scanned += window.len() as u64;

            let probes = window.iter().map(|ip| self.inspect(*ip));
            let sightings = tokio::select! {
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                results = futures::future::join_all(probes) => results,
            };

            for sighting in sightings.into_iter().flatten() {
                report.responders += 1;
                self.reconcile(sighting, &mut known, ignore, registry, &mut report)
                    .await;
            }

            tracing::debug!(
                "Discovery progress: {}/{} addresses, {} responding",
                report.scanned,
                range.len(),
                report.responders
            );
        }

        if report.cancelled {
            tracing::info!("Discovery cancelled after {} addresses", report.scanned);
        } else {
            tracing::info!(
                "Discovery complete: {} responding, {} new, {} updated in {:.1}s",
                report.responders,
                report.registered.len(),
                report.updated.len(),
                started.elapsed().as_secs_f64()
            );
        }

        Ok(report)
    }

    /// Probe one address and gather what is known about it.
    async fn inspect(&self, ip: Address) -> Option<Sighting> {
        if ip.is_unspecified() || ip == Address::LOCALHOST {
            return None;
        }

        let host = ip.to_string();
        match self.prober.probe(&host, self.options.probe_timeout).await {
            Ok(result) if result.alive => {}
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", ip, e);
                return None;
            }
        }

        let Some(mac) = self.hardware.resolve_hardware_address(ip).await else {
            tracing::debug!("{} answered but has no hardware address, skipping", ip);
            return None;
        };
        let vendor = self.vendors.vendor_for(&mac);
        let name = self.names.resolve_name(ip).await;

        Some(Sighting {
            ip,
            mac,
            vendor,
            name,
        })
    }

    async fn reconcile(
        &self,
        sighting: Sighting,
        known: &mut Vec<DeviceRecord>,
        ignore: &IgnoreList,
        registry: &dyn DeviceRegistry,
        report: &mut DiscoveryReport,
    ) {
        if let Some(existing) = known.iter_mut().find(|d| d.mac == Some(sighting.mac)) {
            if existing.ip == sighting.ip {
                return;
            }
            let patch = DevicePatch {
                ip: Some(sighting.ip),
                vendor: Some(sighting.vendor),
                ..Default::default()
            };
            match registry.upsert(&existing.key, patch).await {
                Ok(record) => {
                    tracing::info!(
                        "Device {} moved from {} to {}",
                        record.key,
                        existing.ip,
                        record.ip
                    );
                    *existing = record.clone();
                    report.updated.push(record);
                }
                Err(e) => tracing::warn!("Failed to update device {}: {}", existing.key, e),
            }
            return;
        }

        if ignore.contains(&sighting.mac) {
            tracing::debug!("Ignoring {} ({})", sighting.ip, sighting.mac);
            return;
        }

        let key = DeviceKey::from_hardware_address(&sighting.mac);
        let patch = DevicePatch {
            ip: Some(sighting.ip),
            name: Some(sighting.name),
            mac: Some(sighting.mac),
            enabled: Some(true),
            ping_interval_secs: Some(self.options.ping_interval_secs),
            retries: Some(self.options.retries),
            wake_with_ip: None,
            vendor: Some(sighting.vendor),
        };
        match registry.upsert(&key, patch).await {
            Ok(record) => {
                tracing::info!(
                    "New device {} at {} ({})",
                    record.name,
                    record.ip,
                    record.vendor.as_deref().unwrap_or("unknown vendor")
                );
                known.push(record.clone());
                report.registered.push(record);
            }
            Err(e) => tracing::warn!("Failed to register {}: {}", sighting.ip, e),
        }
    }
}
