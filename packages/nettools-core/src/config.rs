//! Agent configuration
//!
//! Values are read loosely (numbers may be quoted, flags may be strings or
//! numbers) and coerced once into [`Config`]. Out-of-range values are clamped
//! or replaced by their default with a warning; an unusable discovery range
//! is an error.

use crate::discovery::{DEFAULT_TIMEOUT_FRACTION, DiscoveryOptions};
use crate::error::{NetError, Result};
use crate::ipcalc::{Address, AddressRange};
use crate::portscan::DEFAULT_CONNECT_TIMEOUT;
use crate::registry::{DEFAULT_PING_INTERVAL_SECS, IgnoreList, clamp_ping_interval};
use crate::scanner::HardwareAddress;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file that overrides the default one
pub const ENV_CONFIG_PATH: &str = "NETTOOLS_CONFIG";

pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 2;

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// File named by the environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Explicit scan range; the local interface block when `None`.
    pub range: Option<AddressRange>,
    /// Probe timeout as a fraction of a second.
    pub timeout_fraction: f64,
    pub ignore: IgnoreList,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortScanConfig {
    /// Port list such as `22,80,8000-8100`; empty scans every port.
    pub ports: String,
    pub scan_localhost_on_start: bool,
    pub connect_timeout: Duration,
}

/// Validated runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub retries: u32,
    pub discovery: DiscoveryConfig,
    pub port_scan: PortScanConfig,
    pub registry_path: Option<PathBuf>,
    pub source: ConfigSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            ping_timeout_secs: DEFAULT_PING_TIMEOUT_SECS,
            retries: 0,
            discovery: DiscoveryConfig {
                range: None,
                timeout_fraction: DEFAULT_TIMEOUT_FRACTION,
                ignore: IgnoreList::default(),
            },
            port_scan: PortScanConfig {
                ports: String::new(),
                scan_localhost_on_start: false,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            },
            registry_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl Config {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            ping_interval_secs: self.ping_interval_secs,
            retries: self.retries,
            ..DiscoveryOptions::default()
        }
        .with_timeout_fraction(self.discovery.timeout_fraction)
    }
}

/// Configuration file as written, before coercion.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub ping_interval: Option<Value>,
    pub ping_timeout: Option<Value>,
    pub retries: Option<Value>,
    pub discovery: RawDiscovery,
    pub port_scan: RawPortScan,
    pub registry_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDiscovery {
    pub start_ip: Option<Value>,
    pub end_ip: Option<Value>,
    pub timeout_fraction: Option<Value>,
    pub ignore: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPortScan {
    pub ports: Option<Value>,
    pub scan_localhost_on_start: Option<Value>,
    pub connect_timeout_ms: Option<Value>,
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce an optional value, warning when it is present but unusable.
fn coerce<T>(
    field: &str,
    value: Option<&Value>,
    convert: impl Fn(&Value) -> Option<T>,
    default: T,
) -> T {
    match value {
        None | Some(Value::Null) => default,
        Some(v) => convert(v).unwrap_or_else(|| {
            tracing::warn!("Ignoring invalid {} value {}", field, v);
            default
        }),
    }
}

impl RawConfig {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Coerce into a [`Config`] recorded as coming from `source`.
    pub fn validate(self, source: ConfigSource) -> Result<Config> {
        let ping_interval = coerce(
            "ping_interval",
            self.ping_interval.as_ref(),
            as_i64,
            DEFAULT_PING_INTERVAL_SECS as i64,
        );
        let ping_interval_secs = clamp_ping_interval(ping_interval.max(0) as u64);

        let ping_timeout = coerce(
            "ping_timeout",
            self.ping_timeout.as_ref(),
            as_i64,
            DEFAULT_PING_TIMEOUT_SECS as i64,
        );
        let ping_timeout_secs = if ping_timeout < 1 {
            tracing::warn!("ping_timeout must be at least 1s, using 1s");
            1
        } else {
            ping_timeout as u64
        };

        let retries = coerce("retries", self.retries.as_ref(), as_i64, 0);
        let retries = if retries < 0 {
            tracing::warn!("retries cannot be negative, using 0");
            0
        } else {
            u32::try_from(retries).unwrap_or(u32::MAX)
        };

        Ok(Config {
            ping_interval_secs,
            ping_timeout_secs,
            retries,
            discovery: self.discovery.validate()?,
            port_scan: self.port_scan.validate()?,
            registry_path: self
                .registry_path
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            source,
        })
    }
}

impl RawDiscovery {
    fn validate(self) -> Result<DiscoveryConfig> {
        let address = |field: &str, value: Option<Value>| -> Result<Option<Address>> {
            match value.as_ref().and_then(as_text).filter(|s| !s.is_empty()) {
                Some(s) => Address::parse(&s)
                    .map(Some)
                    .map_err(|_| NetError::invalid_format(format!("{field}: {s:?}"))),
                None => Ok(None),
            }
        };
        let range = match (
            address("discovery.start_ip", self.start_ip)?,
            address("discovery.end_ip", self.end_ip)?,
        ) {
            (Some(start), Some(end)) => Some(AddressRange::new(start, end)?),
            (None, None) => None,
            _ => {
                return Err(NetError::invalid_format(
                    "discovery.start_ip and discovery.end_ip must be set together",
                ));
            }
        };

        let fraction = coerce(
            "discovery.timeout_fraction",
            self.timeout_fraction.as_ref(),
            as_f64,
            DEFAULT_TIMEOUT_FRACTION,
        );
        let timeout_fraction = if fraction > 0.0 && fraction < 1.0 {
            fraction
        } else {
            tracing::warn!(
                "discovery.timeout_fraction {} outside (0, 1), using {}",
                fraction,
                DEFAULT_TIMEOUT_FRACTION
            );
            DEFAULT_TIMEOUT_FRACTION
        };

        let ignore = self
            .ignore
            .iter()
            .filter_map(|v| {
                let parsed = as_text(v).and_then(|s| s.parse::<HardwareAddress>().ok());
                if parsed.is_none() {
                    tracing::warn!("Ignoring invalid discovery.ignore entry {}", v);
                }
                parsed
            })
            .collect::<Vec<_>>();

        Ok(DiscoveryConfig {
            range,
            timeout_fraction,
            ignore: IgnoreList::new(ignore),
        })
    }
}

impl RawPortScan {
    fn validate(self) -> Result<PortScanConfig> {
        let ports = self
            .ports
            .as_ref()
            .and_then(as_text)
            .unwrap_or_default();
        // reject a malformed list up front rather than at scan time
        crate::portscan::parse_port_list(&ports)?;

        let connect_timeout_ms = coerce(
            "port_scan.connect_timeout_ms",
            self.connect_timeout_ms.as_ref(),
            as_i64,
            DEFAULT_CONNECT_TIMEOUT.as_millis() as i64,
        )
        .max(1);

        Ok(PortScanConfig {
            ports,
            scan_localhost_on_start: coerce(
                "port_scan.scan_localhost_on_start",
                self.scan_localhost_on_start.as_ref(),
                as_bool,
                false,
            ),
            connect_timeout: Duration::from_millis(connect_timeout_ms as u64),
        })
    }
}

/// Get the path to the configuration file
pub fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("nettools").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/nettools/config.toml".to_string())
}

/// Load and validate one config file.
pub fn load_config_from(path: &Path, source: ConfigSource) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let raw = RawConfig::parse(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    let config = raw.validate(source)?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Load configuration with priority:
/// 1. File named by `NETTOOLS_CONFIG`
/// 2. Config file (~/.config/nettools/config.toml)
/// 3. Default values
///
/// A file named by the environment variable must load; a broken default
/// file only produces a warning.
pub fn load_config() -> anyhow::Result<Config> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        let path = path.trim();
        if !path.is_empty() {
            tracing::info!("Using config from environment variable: {}", path);
            return load_config_from(Path::new(path), ConfigSource::Environment);
        }
    }

    if let Some(path) = get_config_file_path().filter(|p| p.exists()) {
        match load_config_from(&path, ConfigSource::ConfigFile) {
            Ok(config) => {
                tracing::info!("Using config file: {}", path.display());
                return Ok(config);
            }
            Err(e) => tracing::warn!("{:#}, using defaults", e),
        }
    }

    tracing::debug!("Using default configuration");
    Ok(Config::default())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# nettools configuration
# Place this file at: ~/.config/nettools/config.toml
# or point NETTOOLS_CONFIG at it.

# Seconds between probes of each monitored device (minimum 5)
ping_interval = 60

# Seconds to wait for a ping reply
ping_timeout = 2

# Failed probes tolerated before a device is reported dead
retries = 0

# Device registry location (default: <data dir>/nettools/devices.json)
# registry_path = "/var/lib/nettools/devices.json"

[discovery]
# Explicit sweep range; the local interface network is used when unset
# start_ip = "192.168.1.1"
# end_ip = "192.168.1.254"

# Probe timeout during discovery as a fraction of a second
timeout_fraction = 0.5

# Hardware addresses never registered by discovery
# ignore = ["00:11:22:33:44:55"]

[port_scan]
# Ports to scan, e.g. "22,80,443,8000-8100" (empty = 0-65535)
ports = ""

# Scan the local host's ports when the monitor starts
scan_localhost_on_start = false

# TCP connect timeout per port in milliseconds
connect_timeout_ms = 500
"#
    .to_string()
}
