//! Probe capability checks
//!
//! Reachability probes shell out to the system `ping`, which needs either a
//! setuid binary, `cap_net_raw` on the binary, or unprivileged ICMP sockets
//! (`net.ipv4.ping_group_range`). When none of those hold every probe fails.

use super::arp::get_arp_table;
use super::ping::ping_host;
use serde::Serialize;
use std::time::Duration;

/// What the current process can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCapabilities {
    pub can_ping: bool,
    pub can_read_arp: bool,
    pub is_elevated: bool,
    pub warning: Option<String>,
    pub elevation_instructions: Option<String>,
}

impl ScanCapabilities {
    /// Discovery and monitoring both need a working probe.
    pub fn is_limited(&self) -> bool {
        !self.can_ping
    }

    pub fn summary(&self) -> String {
        if !self.is_limited() {
            return "Probing with full capabilities".to_string();
        }
        let mut msg = String::from("Probing with limited capabilities:\n");
        msg.push_str("  - ping is not permitted; every host will look unreachable\n");
        if !self.can_read_arp {
            msg.push_str("  - ARP table unreadable; hardware addresses unavailable\n");
        }
        if let Some(ref instructions) = self.elevation_instructions {
            msg.push('\n');
            msg.push_str(instructions);
        }
        msg
    }
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Ping the loopback address once with the system probe.
pub async fn test_ping_capability() -> bool {
    match ping_host("127.0.0.1", Duration::from_secs(2)).await {
        Ok(result) => result.alive,
        Err(e) => {
            tracing::debug!("Loopback ping failed: {}", e);
            false
        }
    }
}

pub async fn detect_capabilities() -> ScanCapabilities {
    let is_elevated = is_elevated();
    let can_ping = test_ping_capability().await;
    let can_read_arp = get_arp_table().await.is_ok();

    let (warning, elevation_instructions) = if can_ping {
        (None, None)
    } else {
        (
            Some("System ping is not usable by this process".to_string()),
            Some(get_elevation_instructions()),
        )
    };

    ScanCapabilities {
        can_ping,
        can_read_arp,
        is_elevated,
        warning,
        elevation_instructions,
    }
}

/// Platform-specific steps that let the system ping run.
pub fn get_elevation_instructions() -> String {
    #[cfg(target_os = "windows")]
    {
        "ICMP echo normally works without administrator rights on Windows.\n\
         Check that outbound ICMP is not blocked by the firewall, or run\n\
         nettools from an elevated prompt."
            .to_string()
    }

    #[cfg(target_os = "linux")]
    {
        "To let the system ping send ICMP echo requests on Linux:\n\
         \n\
         Option 1 - Grant the raw socket capability to ping:\n\
         $ sudo setcap cap_net_raw+p \"$(command -v ping)\"\n\
         \n\
         Option 2 - Allow unprivileged ICMP sockets for your group:\n\
         $ sudo sysctl -w net.ipv4.ping_group_range=\"0 2147483647\"\n\
         \n\
         Option 3 - Run nettools as root (not recommended)."
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "The system ping is setuid on macOS and normally needs no changes.\n\
         Check that /sbin/ping exists and is executable."
            .to_string()
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "The system ping could not be run. Ensure it is installed and\n\
         permitted to send ICMP echo requests."
            .to_string()
    }
}
