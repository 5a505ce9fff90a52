//! Device registry: the known devices and their monitoring settings.
//!
//! Records are keyed by [`DeviceKey`], which is derived from the hardware
//! address when one is known and from the user-supplied name otherwise. A
//! hardware address belongs to at most one record.

use crate::error::{NetError, Result};
use crate::ipcalc::Address;
use crate::scanner::HardwareAddress;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Shortest permitted interval between probes of one device.
pub const MIN_PING_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 60;

const REGISTRY_FILE: &str = "devices.json";
const FORBIDDEN_KEY_CHARS: &[char] = &[
    ']', '[', '*', ',', ';', '\'', '"', '`', '<', '>', '\\', '?',
];

/// Raise an interval below the floor to the floor, with a warning.
pub fn clamp_ping_interval(secs: u64) -> u64 {
    if secs < MIN_PING_INTERVAL_SECS {
        tracing::warn!(
            "Ping interval {}s is below the minimum, using {}s",
            secs,
            MIN_PING_INTERVAL_SECS
        );
        MIN_PING_INTERVAL_SECS
    } else {
        secs
    }
}

/// Stable identity of a device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Key of the pseudo-device standing for the local host.
    pub const LOCALHOST: &'static str = "localhost";

    pub fn from_hardware_address(mac: &HardwareAddress) -> Self {
        Self(mac.key())
    }

    /// Name-derived key with characters unsafe in identifiers replaced by `_`.
    pub fn from_name(name: &str) -> Self {
        Self(
            name.trim()
                .chars()
                .map(|c| if FORBIDDEN_KEY_CHARS.contains(&c) { '_' } else { c })
                .collect(),
        )
    }

    /// Hardware address wins over the name.
    pub fn for_device(mac: Option<&HardwareAddress>, name: &str) -> Self {
        match mac {
            Some(mac) => Self::from_hardware_address(mac),
            None => Self::from_name(name),
        }
    }

    pub fn localhost() -> Self {
        Self(Self::LOCALHOST.to_string())
    }

    pub fn is_localhost(&self) -> bool {
        self.0 == Self::LOCALHOST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub key: DeviceKey,
    pub ip: Address,
    pub name: String,
    #[serde(default)]
    pub mac: Option<HardwareAddress>,
    pub enabled: bool,
    pub ping_interval_secs: u64,
    pub retries: u32,
    #[serde(default)]
    pub wake_with_ip: bool,
    #[serde(default)]
    pub vendor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn new(key: DeviceKey, ip: Address, name: impl Into<String>) -> Self {
        Self {
            key,
            ip,
            name: name.into(),
            mac: None,
            enabled: true,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            retries: 0,
            wake_with_ip: false,
            vendor: None,
            created_at: Utc::now(),
        }
    }

    /// Target handed to the probe.
    pub fn host(&self) -> String {
        self.ip.to_string()
    }
}

/// Field edits applied by [`DeviceRegistry::upsert`]. `None` leaves a field
/// untouched; for `vendor` the inner `None` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePatch {
    pub ip: Option<Address>,
    pub name: Option<String>,
    pub mac: Option<HardwareAddress>,
    pub enabled: Option<bool>,
    pub ping_interval_secs: Option<u64>,
    pub retries: Option<u32>,
    pub wake_with_ip: Option<bool>,
    pub vendor: Option<Option<String>>,
}

impl DevicePatch {
    /// Patch that recreates `record` in full.
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            ip: Some(record.ip),
            name: Some(record.name.clone()),
            mac: record.mac,
            enabled: Some(record.enabled),
            ping_interval_secs: Some(record.ping_interval_secs),
            retries: Some(record.retries),
            wake_with_ip: Some(record.wake_with_ip),
            vendor: Some(record.vendor.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, record: &mut DeviceRecord) {
        if let Some(ip) = self.ip {
            record.ip = ip;
        }
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(mac) = self.mac {
            record.mac = Some(mac);
        }
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(secs) = self.ping_interval_secs {
            record.ping_interval_secs = clamp_ping_interval(secs);
        }
        if let Some(retries) = self.retries {
            record.retries = retries;
        }
        if let Some(wake_with_ip) = self.wake_with_ip {
            record.wake_with_ip = wake_with_ip;
        }
        if let Some(vendor) = self.vendor {
            record.vendor = vendor;
        }
    }

    fn create(self, key: &DeviceKey) -> Result<DeviceRecord> {
        let ip = self
            .ip
            .ok_or_else(|| NetError::invalid_format(format!("device {key} needs an IP address")))?;
        let mut record = DeviceRecord::new(key.clone(), ip, key.to_string());
        self.apply(&mut record);
        Ok(record)
    }
}

/// Persistent store of device records.
///
/// Callers re-read the registry for every reconciliation pass instead of
/// holding on to a listing.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// All records, ordered by key.
    async fn list(&self) -> Result<Vec<DeviceRecord>>;

    async fn get(&self, key: &DeviceKey) -> Result<Option<DeviceRecord>>;

    /// Apply `patch` to the record under `key`, creating it when absent.
    /// A new record needs at least an IP address.
    async fn upsert(&self, key: &DeviceKey, patch: DevicePatch) -> Result<DeviceRecord>;

    /// Returns whether a record was removed.
    async fn remove(&self, key: &DeviceKey) -> Result<bool>;
}

/// Records keyed and ordered by device key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceTable {
    devices: BTreeMap<DeviceKey, DeviceRecord>,
}

impl DeviceTable {
    fn upsert(&mut self, key: &DeviceKey, patch: DevicePatch) -> Result<DeviceRecord> {
        if let Some(mac) = patch.mac {
            if let Some(owner) = self
                .devices
                .values()
                .find(|r| r.mac == Some(mac) && &r.key != key)
            {
                return Err(NetError::HardwareAddressInUse {
                    mac: mac.to_string(),
                    existing: owner.key.to_string(),
                });
            }
        }

        let record = match self.devices.get_mut(key) {
            Some(record) => {
                patch.apply(record);
                record.clone()
            }
            None => {
                let record = patch.create(key)?;
                self.devices.insert(key.clone(), record.clone());
                record
            }
        };
        Ok(record)
    }
}

/// Registry held in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    table: Mutex<DeviceTable>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let devices = records.into_iter().map(|r| (r.key.clone(), r)).collect();
        Self {
            table: Mutex::new(DeviceTable { devices }),
        }
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.table.lock().await.devices.values().cloned().collect())
    }

    async fn get(&self, key: &DeviceKey) -> Result<Option<DeviceRecord>> {
        Ok(self.table.lock().await.devices.get(key).cloned())
    }

    async fn upsert(&self, key: &DeviceKey, patch: DevicePatch) -> Result<DeviceRecord> {
        self.table.lock().await.upsert(key, patch)
    }

    async fn remove(&self, key: &DeviceKey) -> Result<bool> {
        Ok(self.table.lock().await.devices.remove(key).is_some())
    }
}

/// Registry stored as a JSON document, re-read on every operation.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<data dir>/nettools/devices.json`
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .context("Could not find data directory")?;
        Ok(data_dir.join("nettools").join(REGISTRY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> anyhow::Result<DeviceTable> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let table: DeviceTable = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", self.path.display()))?;
                tracing::debug!("Loaded {} devices from registry", table.devices.len());
                Ok(table)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No registry file found, starting empty");
                Ok(DeviceTable::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        }
    }

    async fn save(&self, table: &DeviceTable) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context("Failed to create registry directory")?;
        }
        let content = serde_json::to_string_pretty(table).context("Failed to serialize registry")?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::debug!("Saved {} devices to registry", table.devices.len());
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistry for FileRegistry {
    async fn list(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.load().await?.devices.into_values().collect())
    }

    async fn get(&self, key: &DeviceKey) -> Result<Option<DeviceRecord>> {
        Ok(self.load().await?.devices.remove(key))
    }

    async fn upsert(&self, key: &DeviceKey, patch: DevicePatch) -> Result<DeviceRecord> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        let record = table.upsert(key, patch)?;
        self.save(&table).await?;
        Ok(record)
    }

    async fn remove(&self, key: &DeviceKey) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        if table.devices.remove(key).is_none() {
            return Ok(false);
        }
        self.save(&table).await?;
        Ok(true)
    }
}

/// Hardware addresses discovery must never register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList(HashSet<HardwareAddress>);

impl IgnoreList {
    pub fn new(entries: impl IntoIterator<Item = HardwareAddress>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn contains(&self, mac: &HardwareAddress) -> bool {
        self.0.contains(mac)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
