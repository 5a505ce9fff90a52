//! Hardware address resolution from the system neighbour (ARP) table

use super::{HardwareAddress, HardwareResolver, hidden_command};
use crate::ipcalc::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// [`HardwareResolver`] that reads the operating system's ARP cache.
///
/// The entry for a host exists once any packet has been exchanged with it,
/// so resolving right after a successful probe is reliable on a flat LAN.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArpResolver;

#[async_trait]
impl HardwareResolver for ArpResolver {
    async fn resolve_hardware_address(&self, ip: Address) -> Option<HardwareAddress> {
        match get_arp_table().await {
            Ok(entries) => {
                let found = entries
                    .into_iter()
                    .find(|(entry_ip, _)| *entry_ip == ip)
                    .map(|(_, mac)| mac);
                if found.is_none() {
                    tracing::debug!("No ARP entry for {}", ip);
                }
                found
            }
            Err(e) => {
                tracing::warn!("Failed to read ARP table: {:#}", e);
                None
            }
        }
    }
}

/// Read the neighbour table as (ip, mac) pairs.
pub async fn get_arp_table() -> Result<Vec<(Address, HardwareAddress)>> {
    #[cfg(target_os = "windows")]
    {
        let output = hidden_command("arp")
            .args(["-a"])
            .output()
            .await
            .context("Failed to run arp -a")?;
        Ok(parse_arp_windows(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(output) = hidden_command("ip").args(["neigh", "show"]).output().await {
            if output.status.success() {
                return Ok(parse_ip_neigh(&String::from_utf8_lossy(&output.stdout)));
            }
        }
        let output = hidden_command("arp")
            .args(["-n"])
            .output()
            .await
            .context("Failed to run arp -n")?;
        Ok(parse_arp_linux(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let output = hidden_command("arp")
            .args(["-a", "-n"])
            .output()
            .await
            .context("Failed to run arp -a -n")?;
        Ok(parse_arp_bsd(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn usable(ip: &str, mac: &str) -> Option<(Address, HardwareAddress)> {
    let ip = Address::parse(ip).ok()?;
    let mac: HardwareAddress = mac.parse().ok()?;
    if mac.is_zero() || mac.is_broadcast() {
        return None;
    }
    Some((ip, mac))
}

/// `ip neigh show`: `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_ip_neigh(output: &str) -> Vec<(Address, HardwareAddress)> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let ip = parts.first()?;
            let lladdr = parts.iter().position(|p| *p == "lladdr")?;
            if line.contains("FAILED") || line.contains("INCOMPLETE") {
                return None;
            }
            usable(ip, parts.get(lladdr + 1)?)
        })
        .collect()
}

/// `arp -n`: `192.168.1.1  ether  aa:bb:cc:dd:ee:ff  C  eth0`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_arp_linux(output: &str) -> Vec<(Address, HardwareAddress)> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 || parts[2] == "(incomplete)" {
                return None;
            }
            usable(parts[0], parts[2])
        })
        .collect()
}

/// `arp -a -n`: `? (192.168.1.1) at 0:1a:2b:3c:4d:5e on en0 ifscope [ethernet]`
#[cfg_attr(any(target_os = "linux", target_os = "windows"), allow(dead_code))]
fn parse_arp_bsd(output: &str) -> Vec<(Address, HardwareAddress)> {
    output
        .lines()
        .filter_map(|line| {
            let ip_start = line.find('(')?;
            let ip_end = line.find(')')?;
            let ip = line.get(ip_start + 1..ip_end)?;
            let at_pos = line.find(" at ")?;
            let mac = line[at_pos + 4..].split_whitespace().next()?;
            if mac == "(incomplete)" {
                return None;
            }
            usable(ip, mac)
        })
        .collect()
}

/// `arp -a`: `  192.168.1.1           aa-bb-cc-dd-ee-ff     dynamic`
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_arp_windows(output: &str) -> Vec<(Address, HardwareAddress)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Interface") || line.contains("Internet Address")
            {
                return None;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 || !parts[1].contains('-') {
                return None;
            }
            if parts[0].starts_with("224.") || parts[0].starts_with("239.") {
                return None;
            }
            usable(parts[0], parts[1])
        })
        .collect()
}
