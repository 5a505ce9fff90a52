//! Local IPv4 interface enumeration
//!
//! The discovery sweep falls back to the block of the first usable local
//! interface when no explicit range is configured.

use super::hidden_command;
use crate::ipcalc::{Address, AddressRange, SubnetBlock, block_for, prefix_from_mask};
use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::fmt;

/// Adapter names that belong to hypervisors, containers or VPNs.
const VIRTUAL_PATTERNS: [&str; 8] = [
    "vEthernet",
    "WSL",
    "Hyper-V",
    "VirtualBox",
    "VMware",
    "docker",
    "veth",
    "Tailscale",
];

/// One IPv4 address assigned to a host interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalInterface {
    pub name: String,
    pub address: Address,
    pub block: SubnetBlock,
    pub loopback: bool,
}

impl LocalInterface {
    fn new(name: impl Into<String>, address: Address, block: SubnetBlock) -> Self {
        Self {
            name: name.into(),
            address,
            block,
            loopback: address.is_loopback(),
        }
    }

    /// CIDR notation of the assigned address, e.g. `192.168.1.10/24`.
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, self.block.prefix_length)
    }

    fn is_virtual(&self) -> bool {
        let name = self.name.to_lowercase();
        VIRTUAL_PATTERNS
            .iter()
            .any(|p| name.contains(&p.to_lowercase()))
    }

    fn is_link_local(&self) -> bool {
        let [a, b, _, _] = self.address.octets();
        a == 169 && b == 254
    }
}

impl fmt::Display for LocalInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.cidr(), self.name)
    }
}

/// List IPv4 addresses on all host interfaces.
pub async fn local_interfaces() -> Result<Vec<LocalInterface>> {
    #[cfg(target_os = "windows")]
    {
        let output = hidden_command("ipconfig")
            .output()
            .await
            .context("Failed to run ipconfig")?;
        Ok(parse_ipconfig(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(target_os = "linux")]
    {
        let output = hidden_command("ip")
            .args(["-o", "-4", "addr", "show"])
            .output()
            .await
            .context("Failed to run ip addr command")?;
        Ok(parse_ip_addr(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let output = hidden_command("ifconfig")
            .output()
            .await
            .context("Failed to run ifconfig command")?;
        Ok(parse_ifconfig(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Range of the interface a sweep should cover by default: physical
/// interfaces first, never loopback or link-local.
pub fn select_discovery_interface(interfaces: &[LocalInterface]) -> Option<&LocalInterface> {
    let usable = |i: &&LocalInterface| !i.loopback && !i.is_link_local();
    interfaces
        .iter()
        .filter(usable)
        .find(|i| !i.is_virtual())
        .or_else(|| interfaces.iter().find(usable))
}

/// Block of the preferred local interface as a scan range.
pub async fn default_discovery_range() -> Result<AddressRange> {
    let interfaces = local_interfaces().await?;
    let selected = select_discovery_interface(&interfaces)
        .ok_or_else(|| anyhow!("No non-loopback IPv4 interface found"))?;
    tracing::info!("Using interface {} for discovery", selected);
    Ok(AddressRange::from(selected.block))
}

/// `ip -o -4 addr show`:
/// `2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0 ...`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_ip_addr(output: &str) -> Vec<LocalInterface> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let name = parts.get(1)?.trim_end_matches(':');
            let inet = parts.iter().position(|p| *p == "inet")?;
            let network: ipnetwork::Ipv4Network = parts.get(inet + 1)?.parse().ok()?;
            let address = Address::from(network.ip());
            let block = block_for(address, network.prefix()).ok()?;
            Some(LocalInterface::new(name, address, block))
        })
        .collect()
}

/// BSD/macOS `ifconfig`: an unindented `en0: flags=...` header followed by
/// `inet 192.168.1.10 netmask 0xffffff00 broadcast ...` lines.
#[cfg_attr(any(target_os = "linux", target_os = "windows"), allow(dead_code))]
fn parse_ifconfig(output: &str) -> Vec<LocalInterface> {
    let mut interfaces = Vec::new();
    let mut current = String::new();

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            if let Some((name, _)) = line.split_once(':') {
                current = name.to_string();
            }
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.first() != Some(&"inet") {
            continue;
        }
        let Some(address) = parts.get(1).and_then(|ip| Address::parse(ip).ok()) else {
            continue;
        };
        let Some(mask) = parts
            .iter()
            .position(|p| *p == "netmask")
            .and_then(|i| parts.get(i + 1))
            .and_then(|m| parse_netmask(m))
        else {
            continue;
        };
        if let Ok(block) = prefix_from_mask(address, mask) {
            interfaces.push(LocalInterface::new(current.clone(), address, block));
        }
    }

    interfaces
}

/// Netmasks appear as `0xffffff00` in ifconfig and dotted quads elsewhere.
fn parse_netmask(mask: &str) -> Option<Address> {
    match mask.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok().map(Address::from_u32),
        None => Address::parse(mask).ok(),
    }
}

/// Windows `ipconfig`: adapter headers followed by
/// `IPv4 Address. . . : 192.168.1.10(Preferred)` and `Subnet Mask . . : ...`.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_ipconfig(output: &str) -> Vec<LocalInterface> {
    let mut interfaces = Vec::new();
    let mut name = String::new();
    let mut address: Option<Address> = None;

    let value = |line: &str| -> Option<String> {
        let (_, rest) = line.split_once(':')?;
        Some(rest.trim().trim_end_matches("(Preferred)").to_string())
    };

    for line in output.lines() {
        let trimmed = line.trim();
        if !line.starts_with(char::is_whitespace) && trimmed.ends_with(':') {
            name = trimmed
                .trim_end_matches(':')
                .split(" adapter ")
                .last()
                .unwrap_or(trimmed)
                .to_string();
            address = None;
            continue;
        }
        if trimmed.starts_with("IPv4 Address") || trimmed.starts_with("IP Address") {
            address = value(trimmed).and_then(|ip| Address::parse(&ip).ok());
        } else if trimmed.starts_with("Subnet Mask") {
            let mask = value(trimmed).and_then(|m| parse_netmask(&m));
            if let (Some(ip), Some(mask)) = (address.take(), mask) {
                if let Ok(block) = prefix_from_mask(ip, mask) {
                    interfaces.push(LocalInterface::new(name.clone(), ip, block));
                }
            }
        }
    }

    interfaces
}
